use crate::listing::compile;
use scraper::{ElementRef, Html, Node, Selector};
use tradewatch_core::{CoreError, SelectorConfig};

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Opening post of a thread, quotes and scripts removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBody {
    pub html: String,
    pub text: String,
}

#[derive(Debug)]
pub struct ThreadParser {
    first_message: Selector,
    message_body: Selector,
    stripped_blocks: Vec<Selector>,
}

impl ThreadParser {
    pub fn new(selectors: &SelectorConfig) -> Result<Self, CoreError> {
        let stripped_blocks = selectors
            .stripped_blocks
            .iter()
            .map(|s| compile(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            first_message: compile(&selectors.first_message)?,
            message_body: compile(&selectors.message_body)?,
            stripped_blocks,
        })
    }

    /// `None` when the page has no post message (deleted or moderated thread).
    pub fn extract_body(&self, markup: &str) -> Option<ThreadBody> {
        let mut document = Html::parse_document(markup);

        let (body_id, doomed) = {
            let message = document.select(&self.first_message).next()?;
            let body = message.select(&self.message_body).next().unwrap_or(message);
            let doomed: Vec<_> = self
                .stripped_blocks
                .iter()
                .flat_map(|selector| body.select(selector).map(|el| el.id()))
                .collect();
            (body.id(), doomed)
        };

        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }

        let body = ElementRef::wrap(document.tree.get(body_id)?)?;
        let mut raw = String::new();
        collect_text(body, &mut raw);

        Some(ThreadBody {
            html: body.inner_html().trim().to_string(),
            text: normalize_lines(&raw),
        })
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Collapses whitespace within lines and drops blank lines.
fn normalize_lines(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
