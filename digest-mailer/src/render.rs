use chrono::{DateTime, Duration, Utc};
use std::fmt::Write;
use tradewatch_core::ScoredPost;

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// "Today at 7:21 AM", "Yesterday at 6:56 AM" or "Jan 11 at 7:21 AM", all UTC.
pub fn format_human_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let time = ts.format("%-I:%M %p");
    let today = now.date_naive();

    if ts.date_naive() == today {
        format!("Today at {time}")
    } else if ts.date_naive() == today - Duration::days(1) {
        format!("Yesterday at {time}")
    } else {
        ts.format("%b %-d at %-I:%M %p").to_string()
    }
}

/// Renders the ranked posts as one HTML document, in the order given.
pub fn render_digest(title: &str, posts: &[ScoredPost], now: DateTime<Utc>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n");
    html.push_str("<body style=\"font-family: Arial, sans-serif; color: #222;\">\n");
    let _ = writeln!(html, "<h2>{}</h2>", escape_html(title));
    let _ = writeln!(
        html,
        "<p>{} new post{} above the intent threshold.</p>",
        posts.len(),
        if posts.len() == 1 { "" } else { "s" }
    );

    html.push_str("<table cellpadding=\"6\" cellspacing=\"0\" border=\"1\" style=\"border-collapse: collapse;\">\n");
    html.push_str("<tr><th>#</th><th>Score</th><th>Thread</th><th>Author</th><th>Replies</th><th>Views</th><th>Posted</th></tr>\n");

    for (rank, scored) in posts.iter().enumerate() {
        let post = &scored.post;
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td><b>{}</b></td><td><a href=\"{}\">{}</a><br><small>{}</small></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            rank + 1,
            scored.intent_score,
            escape_html(&post.url),
            escape_html(&post.title),
            escape_html(&post.category),
            escape_html(&post.author),
            post.replies,
            post.views,
            format_human_time(post.published_at, now),
        );

        if let Some(summary) = scored.summary.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(
                html,
                "<tr><td></td><td colspan=\"6\">{}</td></tr>",
                escape_html(summary)
            );
        }

        if !scored.intent_reasons.is_empty() {
            let _ = writeln!(
                html,
                "<tr><td></td><td colspan=\"6\"><small style=\"color: #666;\">{}</small></td></tr>",
                escape_html(&scored.intent_reasons.join(", "))
            );
        }
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}
