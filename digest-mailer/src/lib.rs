//! HTML digest rendering and SMTP delivery.

pub mod render;
pub mod smtp;

pub use render::{escape_html, format_human_time, render_digest};
pub use smtp::SmtpDigestSender;
