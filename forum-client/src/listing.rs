use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tradewatch_core::{CoreError, ParseError, SelectorConfig};
use url::Url;

const THREAD_ID_PATTERN: &str = r"\.(\d+)/?$";

/// A thread summary as it appears on a category listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingItem {
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub author: String,
    pub category: String,
    pub replies: u64,
    pub views: u64,
    pub published_at: DateTime<Utc>,
}

/// Extracts thread summaries and pagination from category listing pages.
#[derive(Debug)]
pub struct ListingParser {
    base_url: Url,
    page_nav_link: Selector,
    thread_item: Selector,
    title_link: Selector,
    author: Selector,
    category_link: Selector,
    counter_pair: Selector,
    counter_label: Selector,
    counter_value: Selector,
    published_time: Selector,
    thread_id: Regex,
}

impl ListingParser {
    pub fn new(base_url: Url, selectors: &SelectorConfig) -> Result<Self, CoreError> {
        let thread_id = Regex::new(THREAD_ID_PATTERN).map_err(|e| ParseError::InvalidPattern {
            pattern: THREAD_ID_PATTERN.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            base_url,
            page_nav_link: compile(&selectors.page_nav_link)?,
            thread_item: compile(&selectors.thread_item)?,
            title_link: compile(&selectors.title_link)?,
            author: compile(&selectors.author)?,
            category_link: compile(&selectors.category_link)?,
            counter_pair: compile(&selectors.counter_pair)?,
            counter_label: compile("dt")?,
            counter_value: compile("dd")?,
            published_time: compile(&selectors.published_time)?,
            thread_id,
        })
    }

    /// Highest purely numeric label among the pagination links, or 1.
    pub fn last_page_number(&self, markup: &str) -> u32 {
        let document = Html::parse_document(markup);
        document
            .select(&self.page_nav_link)
            .filter_map(|a| {
                let label = element_text(a);
                if !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()) {
                    label.parse::<u32>().ok()
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Thread summaries in document order. Items without a title link or a
    /// numeric thread id are left out; `now` stands in for missing timestamps.
    pub fn extract_items(&self, markup: &str, now: DateTime<Utc>) -> Vec<ListingItem> {
        let document = Html::parse_document(markup);
        document
            .select(&self.thread_item)
            .filter_map(|item| self.extract_item(item, now))
            .collect()
    }

    fn extract_item(&self, item: ElementRef<'_>, now: DateTime<Utc>) -> Option<ListingItem> {
        let link = item.select(&self.title_link).next()?;
        let href = link.value().attr("href")?.trim();
        let external_id = self.external_id(href)?;

        let url = self
            .base_url
            .join(href)
            .map(String::from)
            .unwrap_or_else(|_| href.to_string());

        let author = item
            .select(&self.author)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let category = item
            .select(&self.category_link)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let mut replies = 0;
        let mut views = 0;
        for pair in item.select(&self.counter_pair) {
            let (Some(label), Some(value)) = (
                pair.select(&self.counter_label).next(),
                pair.select(&self.counter_value).next(),
            ) else {
                continue;
            };

            let value = parse_abbreviated_count(&value.text().collect::<String>());
            match element_text(label).to_lowercase().as_str() {
                "replies" => replies = value,
                "views" => views = value,
                _ => {}
            }
        }

        let published_at = item
            .select(&self.published_time)
            .next()
            .and_then(|time| time.value().attr("datetime"))
            .and_then(parse_timestamp)
            .unwrap_or(now);

        Some(ListingItem {
            external_id,
            url,
            title: element_text(link),
            author,
            category,
            replies,
            views,
            published_at,
        })
    }

    /// Numeric suffix of a thread URL, e.g. `/threads/es-scalping.371234/`.
    pub fn external_id(&self, href: &str) -> Option<String> {
        self.thread_id
            .captures(href)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

pub(crate) fn compile(selector: &str) -> Result<Selector, CoreError> {
    Selector::parse(selector).map_err(|e| {
        CoreError::Parse(ParseError::InvalidSelector {
            selector: selector.to_string(),
            reason: format!("{e:?}"),
        })
    })
}

/// Element text with whitespace runs collapsed and ends trimmed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses forum counters such as `1,234`, `1.2K` or `3M`. Anything
/// unparsable counts as 0.
pub fn parse_abbreviated_count(raw: &str) -> u64 {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    let (number, multiplier) = if let Some(stripped) = cleaned.strip_suffix('K') {
        (stripped, 1_000u64)
    } else if let Some(stripped) = cleaned.strip_suffix('M') {
        (stripped, 1_000_000u64)
    } else {
        let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
        return digits.parse().unwrap_or(0);
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
    let fraction: String = fraction.chars().filter(char::is_ascii_digit).collect();

    let whole_value = if whole.is_empty() {
        0
    } else {
        match whole.parse::<u64>() {
            Ok(value) => value,
            Err(_) => return 0,
        }
    };

    // Fraction digits beyond the multiplier's precision cannot contribute.
    let precision = multiplier.ilog10() as usize;
    let fraction = &fraction[..fraction.len().min(precision)];
    let fraction_value = if fraction.is_empty() {
        0
    } else {
        let scale = 10u64.pow((precision - fraction.len()) as u32);
        fraction.parse::<u64>().unwrap_or(0) * scale
    };

    whole_value
        .saturating_mul(multiplier)
        .saturating_add(fraction_value)
}

/// ISO-8601 timestamp normalized to UTC. Offsets may be written `+00:00` or
/// `+0000`; a timestamp without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
