use pulldown_cmark::{html, Event, Parser};

use super::transcript::{Role, Transcript};

pub const USER_BUBBLE: &str = "#DCF8C6";
pub const ASSISTANT_BUBBLE: &str = "#F1F0F0";

const CONTAINER_OPEN: &str = "<div class='chat-log' style='max-height: 400px; overflow-y: auto; padding: 10px; border: 1px solid #ddd; border-radius: 10px; background-color: #fff;'>";

/// Markdown to HTML. Raw HTML in the source is shown as text.
pub fn markdown_to_html(text: &str) -> String {
    let events = Parser::new(text).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn bubble(out: &mut String, align: &str, color: &str, body: &str) {
    out.push_str(&format!(
        "<div style='text-align: {align}; margin: 8px 0;'><span style='background-color: {color}; padding: 8px 12px; border-radius: 15px; display: inline-block; max-width: 80%;'>{body}</span></div>",
    ));
}

/// Full transcript as styled bubbles, user on the right.
pub fn render_transcript(transcript: &Transcript) -> String {
    let mut out = String::from(CONTAINER_OPEN);
    for turn in transcript.turns() {
        let body = markdown_to_html(&turn.content);
        match turn.role {
            Role::User => bubble(&mut out, "right", USER_BUBBLE, &body),
            Role::Assistant => bubble(&mut out, "left", ASSISTANT_BUBBLE, &body),
            Role::System => {}
        }
    }
    out.push_str("</div>");
    out
}
