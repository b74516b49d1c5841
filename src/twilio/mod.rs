pub mod sms;

pub use sms::{SmsError, SmsSender, TwilioClient};
