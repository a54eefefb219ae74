//! Daily-data page parser.
//!
//! The page is tokenized into a flat stream of [`MarkupEvent`]s in document
//! order, then a small state machine walks the stream once:
//!
//! * an `<abbr title="May 1, 2018">` annotation contributes one date;
//! * text inside a `<td>` contributes one cell, unless it is one of the
//!   legend / marker strings the site sprinkles into cells.
//!
//! Parser state lives in a [`TableParser`] built fresh for every page.

use crate::models::ParsedPage;
use crate::scraper::ParseError;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Node};
use tracing::{debug, warn};

/// Tag whose text is cell data.
const CELL_TAG: &str = "td";
/// Inline tag whose `title` may carry a full date.
const DATE_ANNOTATION_TAG: &str = "abbr";
const DATE_ANNOTATION_ATTR: &str = "title";
/// "May 1, 2018"
const DATE_ANNOTATION_FORMAT: &str = "%B %d, %Y";
const FIELD_SEPARATOR: char = ',';

/// Legend labels and the estimate marker; never data.
const IGNORED_TEXT: [&str; 5] = ["LegendM", "LegendE", "LegendT", "LegendCarer", "E"];

// ── Event stream ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupEvent {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Close {
        name: String,
    },
}

/// Tokenize a document into open / text / close events in document order.
pub fn markup_events(html: &str) -> Vec<MarkupEvent> {
    let doc = Html::parse_document(html);
    let mut events = Vec::new();
    walk(doc.root_element(), &mut events);
    events
}

fn walk(element: ElementRef<'_>, events: &mut Vec<MarkupEvent>) {
    let el = element.value();
    events.push(MarkupEvent::Open {
        name: el.name().to_string(),
        attrs: el
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    });

    for child in element.children() {
        match child.value() {
            Node::Text(text) => events.push(MarkupEvent::Text(String::from(&**text))),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    walk(child, events);
                }
            }
            _ => {}
        }
    }

    events.push(MarkupEvent::Close {
        name: el.name().to_string(),
    });
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InCell,
}

#[derive(Debug)]
pub struct TableParser {
    state: State,
    dates: Vec<NaiveDate>,
    buffer: String,
}

impl Default for TableParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableParser {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            dates: Vec::new(),
            buffer: String::new(),
        }
    }

    /// Parse one raw page. Never fails: an unreadable tail is logged and the
    /// page yields whatever came before it.
    pub fn parse_page(body: &[u8]) -> ParsedPage {
        let (html, fault) = match std::str::from_utf8(body) {
            Ok(html) => (html, None),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                let err = ParseError::InvalidEncoding { valid_up_to };
                warn!("{}; keeping partial page", err);
                // The prefix up to valid_up_to is always valid UTF-8.
                let prefix = std::str::from_utf8(&body[..valid_up_to]).unwrap_or_default();
                (prefix, Some(err))
            }
        };

        let mut parser = Self::new();
        for event in markup_events(html) {
            parser.handle(event);
        }

        let mut page = parser.finish();
        page.fault = fault;
        page
    }

    pub fn handle(&mut self, event: MarkupEvent) {
        match (self.state, event) {
            (_, MarkupEvent::Open { name, attrs }) if name == DATE_ANNOTATION_TAG => {
                self.annotation(&attrs);
            }
            (State::Idle, MarkupEvent::Open { name, .. }) if name == CELL_TAG => {
                self.state = State::InCell;
            }
            (State::InCell, MarkupEvent::Close { name }) if name == CELL_TAG => {
                self.state = State::Idle;
            }
            (State::InCell, MarkupEvent::Text(text)) => self.cell_text(&text),
            _ => {}
        }
    }

    fn annotation(&mut self, attrs: &[(String, String)]) {
        let Some((_, title)) = attrs.iter().find(|(k, _)| k == DATE_ANNOTATION_ATTR) else {
            return;
        };
        // Plenty of annotations are legends ("Missing", "Estimated"), not dates.
        if let Ok(date) = NaiveDate::parse_from_str(title.trim(), DATE_ANNOTATION_FORMAT) {
            self.dates.push(date);
        }
    }

    fn cell_text(&mut self, raw: &str) {
        // Layout whitespace between tags. A non-breaking space is a blank cell
        // and falls through to an empty field.
        if raw.chars().all(|c| c.is_ascii_whitespace()) {
            return;
        }
        let text = raw.trim();
        if IGNORED_TEXT.contains(&text) {
            return;
        }
        self.buffer.push_str(text);
        self.buffer.push(FIELD_SEPARATOR);
    }

    pub fn finish(self) -> ParsedPage {
        let mut cells: Vec<String> = self
            .buffer
            .split(FIELD_SEPARATOR)
            .map(str::to_string)
            .collect();
        // The buffer always ends with a separator.
        if cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        debug!("parsed {} dates, {} cells", self.dates.len(), cells.len());

        ParsedPage {
            dates: self.dates,
            cells,
            fault: None,
        }
    }
}
