use crate::config::FallbackConfig;

/// Render the fallback SMS body.
///
/// Placeholders: `{greeting}` ("Hi Dana!" or "Hi!"), `{name}`, `{business}`
/// and `{callback}`. Unknown text is left as is.
pub fn render_fallback_message(config: &FallbackConfig, first_name: Option<&str>) -> String {
    let name = first_name.map(str::trim).filter(|n| !n.is_empty());
    let greeting = match name {
        Some(n) => format!("Hi {n}!"),
        None => "Hi!".to_string(),
    };

    let body = config
        .message_template
        .replace("{greeting}", &greeting)
        .replace("{name}", name.unwrap_or("there"))
        .replace("{business}", &config.business_name)
        .replace("{callback}", callback_or_reply(&config.callback_number));

    collapse_spaces(&body)
}

fn callback_or_reply(number: &str) -> &str {
    if number.trim().is_empty() {
        "this number"
    } else {
        number
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Confirmation text sent by the smoke test.
pub fn smoke_test_message(config: &FallbackConfig, first_name: &str) -> String {
    format!(
        "Hi {first_name}! This is a test message from {}. If you received this, text messaging is working.",
        config.business_name
    )
}
