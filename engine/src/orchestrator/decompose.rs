//! Request decomposition and routing
//!
//! Splits an input into independent asks, routes each one to retrieval, to
//! actions, or to both, and picks out preference statements. All of it is
//! plain text heuristics; nothing here calls a collaborator.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::actions::{ActionRegistry, ActionSpec, ParamBinding};
use crate::memory::UserProfile;
use crate::text::{content_words, words};

/// Where a sub-query is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    RetrievalOnly,
    ActionOnly,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub text: String,
    pub route: Route,
    /// Registered actions this sub-query triggers
    pub actions: Vec<String>,
    /// Text sent to the retriever, if the route includes retrieval
    pub search_text: Option<String>,
}

/// An explicit preference signal found in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub sub_queries: Vec<SubQuery>,
    pub preferences: Vec<Preference>,
}

impl Decomposition {
    /// Distinct retrieval texts in sub-query order
    pub fn search_texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = Vec::new();
        for q in &self.sub_queries {
            if let Some(text) = &q.search_text {
                if !texts.contains(text) {
                    texts.push(text.clone());
                }
            }
        }
        texts
    }

    /// Content words of the retrieval texts, used as profile topics
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for text in self.search_texts() {
            for word in content_words(&strip_markers(&text)) {
                if word.len() > 3 && !is_retrieval_cue(&word) && !topics.contains(&word) {
                    topics.push(word);
                }
            }
        }
        topics
    }
}

/// `text` without guardrail markers such as `[REDACTED:email]`
fn strip_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let next = |t: &str| {
        ["[REDACTED:", "[WITHHELD:"]
            .iter()
            .filter_map(|m| t.find(m))
            .min()
    };
    while let Some(start) = next(rest) {
        out.push_str(&rest[..start]);
        match rest[start..].find(']') {
            Some(end) => rest = &rest[start + end + 1..],
            None => rest = "",
        }
    }
    out.push_str(rest);
    out
}

static CLAUSE_BREAK: OnceLock<Option<Regex>> = OnceLock::new();
static CONJUNCTION: OnceLock<Option<Regex>> = OnceLock::new();

fn clause_break() -> Option<&'static Regex> {
    CLAUSE_BREAK
        .get_or_init(|| {
            // Sentence ends, semicolons, newlines and enumerations like "1)" or "2."
            Regex::new(r"[?!;]+|\.\s+|\n+|(?:^|\s)\(?\d{1,2}[.)]\s+|(?:^|\n)\s*[-*•]\s+").ok()
        })
        .as_ref()
}

fn conjunction() -> Option<&'static Regex> {
    CONJUNCTION
        .get_or_init(|| Regex::new(r"(?i),?\s+(?:and then|and also|and|then|also|plus)\s+").ok())
        .as_ref()
}

/// Split `input` into sub-queries and preference statements
pub fn decompose(input: &str, registry: &ActionRegistry) -> Decomposition {
    let mut decomposition = Decomposition::default();

    for clause in split_clauses(input) {
        for part in split_conjunctions(&clause, registry) {
            let prefs = detect_preferences(&part);
            if !prefs.is_empty() && !part.contains('?') {
                decomposition.preferences.extend(prefs);
                continue;
            }
            decomposition.sub_queries.push(route(&part, registry));
        }
    }

    if decomposition.sub_queries.is_empty() && decomposition.preferences.is_empty() {
        let whole = clean(input);
        if !whole.is_empty() {
            decomposition.sub_queries.push(route(&whole, registry));
        }
    }
    decomposition
}

fn split_clauses(input: &str) -> Vec<String> {
    let parts: Vec<&str> = match clause_break() {
        Some(re) => re.split(input).collect(),
        None => vec![input],
    };
    parts
        .into_iter()
        .map(clean)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split on "and"/"then"/"also" only where the right-hand side starts a new ask
fn split_conjunctions(clause: &str, registry: &ActionRegistry) -> Vec<String> {
    let Some(re) = conjunction() else {
        return vec![clause.to_string()];
    };

    let mut parts = Vec::new();
    let mut start = 0;
    for m in re.find_iter(clause) {
        let left = &clause[start..m.start()];
        let right = &clause[m.end()..];
        let first = words(right).into_iter().find(|w| !is_filler(w));

        let starts_new_ask = match first {
            Some(word) => {
                is_clause_start(&word) || !registry.triggered_by(&[word]).is_empty()
            }
            None => false,
        };
        if starts_new_ask && !content_words(left).is_empty() {
            parts.push(clean(left));
            start = m.end();
        }
    }
    parts.push(clean(&clause[start..]));
    parts.retain(|p| !p.is_empty());
    parts
}

fn route(text: &str, registry: &ActionRegistry) -> SubQuery {
    let ws = words(text);
    let triggered = registry.triggered_by(&ws);

    if triggered.is_empty() {
        return SubQuery {
            text: text.to_string(),
            route: Route::RetrievalOnly,
            actions: Vec::new(),
            search_text: Some(text.to_string()),
        };
    }

    let actions: Vec<String> = triggered.iter().map(|s| s.name.clone()).collect();
    let search_text = ws.iter().any(|w| is_retrieval_cue(w)).then(|| {
        content_words(text)
            .into_iter()
            .filter(|w| !triggered.iter().any(|s| s.triggered_by(std::slice::from_ref(w))))
            .collect::<Vec<_>>()
            .join(" ")
    });

    match search_text {
        Some(search) if !search.is_empty() => SubQuery {
            text: text.to_string(),
            route: Route::Both,
            actions,
            search_text: Some(search),
        },
        _ => SubQuery {
            text: text.to_string(),
            route: Route::ActionOnly,
            actions,
            search_text: None,
        },
    }
}

/// Trim whitespace, leading fillers and trailing punctuation
fn clean(part: &str) -> String {
    let mut rest = part.trim();
    loop {
        let lower = rest.to_lowercase();
        let stripped = ["please ", "also ", "then ", "and ", "plus "]
            .iter()
            .find(|f| lower.starts_with(*f))
            .map(|f| rest[f.len()..].trim_start());
        match stripped {
            Some(s) => rest = s,
            None => break,
        }
    }
    rest.trim_end_matches(|c: char| c == '.' || c == ',' || c == ':' || c.is_whitespace())
        .to_string()
}

fn is_filler(word: &str) -> bool {
    matches!(word, "please" | "kindly" | "can" | "could" | "would" | "you")
}

fn is_clause_start(word: &str) -> bool {
    is_retrieval_cue(word)
        || matches!(
            word,
            "is" | "are" | "does" | "do" | "did" | "was" | "were" | "send" | "create" | "open"
                | "schedule" | "notify" | "check" | "book" | "file" | "post" | "remind" | "call"
        )
}

/// Words that ask for information from the documents
fn is_retrieval_cue(word: &str) -> bool {
    matches!(
        word,
        "what" | "who" | "when" | "where" | "why" | "how" | "which" | "summarize" | "summarise"
            | "explain" | "describe" | "find" | "list" | "show" | "tell" | "compare" | "according"
            | "lookup" | "search"
    )
}

static PREFERENCE_PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn preference_patterns() -> &'static [(Regex, &'static str)] {
    PREFERENCE_PATTERNS.get_or_init(|| {
        [
            (r"(?i)\bcall me\s+(.+)", "name"),
            (r"(?i)\b(?:answer|respond|reply|write)\s+in\s+(.+)", "response"),
            (r"(?i)\bi\s+(?:prefer|like)\s+(.+)", "style"),
            (r"(?i)\bmy\s+time\s?zone\s+is\s+(.+)", "timezone"),
        ]
        .into_iter()
        .filter_map(|(pattern, key)| Regex::new(pattern).ok().map(|re| (re, key)))
        .collect()
    })
}

/// Preference statements in `text`
///
/// "answer in French" sets `language`; "answer in bullet points" sets `format`.
pub fn detect_preferences(text: &str) -> Vec<Preference> {
    let mut found = Vec::new();
    for (re, key) in preference_patterns() {
        let Some(value) = re.captures(text).and_then(|c| c.get(1)) else {
            continue;
        };
        let value = value
            .as_str()
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .to_string();
        if value.is_empty() || value.len() > 64 || value.contains("[REDACTED:") {
            continue;
        }

        let key = match *key {
            "response" if is_format(&value) => "format",
            "response" => "language",
            other => other,
        };
        found.push(Preference {
            key: key.to_string(),
            value,
        });
    }
    found
}

fn is_format(value: &str) -> bool {
    let lower = value.to_lowercase();
    ["bullet", "list", "table", "short", "brief", "detail", "markdown", "plain", "sentence"]
        .iter()
        .any(|f| lower.contains(f))
}

/// Values available to parameter bindings
pub struct BindingSources<'a> {
    pub caller: &'a str,
    pub profile: &'a UserProfile,
    /// Text synthesized from retrieved passages, once retrieval has finished
    pub context: Option<&'a str>,
}

/// Build an action's parameter object for one sub-query
///
/// Unbound parameters are left out, so validation names them.
pub fn bind_parameters(spec: &ActionSpec, sub_query: &str, sources: &BindingSources<'_>) -> Value {
    let mut params = Map::new();
    for param in spec.schema.params() {
        let value = match &param.binding {
            ParamBinding::Extract => extract_named(sub_query, &param.name)
                .map(|raw| param.kind.coerce(&raw).unwrap_or(Value::String(raw))),
            ParamBinding::Query => Some(Value::String(sub_query.to_string())),
            ParamBinding::Context => sources.context.map(|c| Value::String(c.to_string())),
            ParamBinding::Caller => Some(Value::String(sources.caller.to_string())),
            ParamBinding::Profile(key) => sources
                .profile
                .preference(key)
                .map(|v| param.kind.coerce(v).unwrap_or(Value::String(v.to_string()))),
            ParamBinding::Literal(v) => Some(v.clone()),
        };
        if let Some(value) = value {
            params.insert(param.name.clone(), value);
        }
    }
    Value::Object(params)
}

static NAMED_VALUE: OnceLock<Option<Regex>> = OnceLock::new();

fn named_value() -> Option<&'static Regex> {
    NAMED_VALUE
        .get_or_init(|| {
            Regex::new(r#"\b([A-Za-z_][\w-]*)\s*[:=]\s*(?:"([^"]*)"|'([^']*)'|([^,;\s]+))"#).ok()
        })
        .as_ref()
}

/// `name=value`, `name: value` or a quoted value; names match case-insensitively
fn extract_named(text: &str, name: &str) -> Option<String> {
    let re = named_value()?;
    let mut start = 0;
    // Resume after each non-matching key so its value can hold the next pair
    while let Some(caps) = re.captures_at(text, start) {
        let key = caps.get(1)?;
        if key.as_str().eq_ignore_ascii_case(name) {
            return caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string());
        }
        start = key.end();
    }
    None
}
