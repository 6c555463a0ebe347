//! Declarative field extraction over a page snapshot.
//!
//! A [`Strategy`] is an ordered list of [`Probe`]s. The interpreter tries
//! them in order and the first non-empty value wins; when every probe misses
//! the field resolves to [`SENTINEL`]. Misses are plain `None`s, never errors.

use scraper::{ElementRef, Selector};
use tracing::warn;

use super::types::{Field, Record, SENTINEL};

/// Addresses zero or more elements relative to a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    /// `/html/body/main/section[4]/p` style path; indices are 1-based and a
    /// step without an index matches every child with that tag. A leading
    /// `/` anchors the path at the document root.
    Path(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn path(path: impl Into<String>) -> Self {
        Locator::Path(path.into())
    }

    /// All matches in document order.
    pub fn select<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match self {
            Locator::Css(selector) => match Selector::parse(selector) {
                Ok(parsed) => scope.select(&parsed).collect(),
                Err(_) => {
                    warn!(selector = %selector, "invalid selector");
                    Vec::new()
                }
            },
            Locator::Path(path) => select_path(scope, path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathStep {
    tag: String,
    index: Option<usize>,
}

impl PathStep {
    fn matches_name(&self, el: &ElementRef<'_>) -> bool {
        self.tag == "*" || el.value().name().eq_ignore_ascii_case(&self.tag)
    }

    fn children<'a>(&self, parent: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        let mut matching = parent
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| self.matches_name(child));
        match self.index {
            Some(n) => matching.nth(n - 1).into_iter().collect(),
            None => matching.collect(),
        }
    }
}

fn parse_path(path: &str) -> Option<Vec<PathStep>> {
    path.trim()
        .trim_start_matches('/')
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                return None;
            }
            match segment.split_once('[') {
                Some((tag, rest)) => {
                    let index = rest
                        .strip_suffix(']')?
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)?;
                    Some(PathStep {
                        tag: tag.to_string(),
                        index: Some(index),
                    })
                }
                None => Some(PathStep {
                    tag: segment.to_string(),
                    index: None,
                }),
            }
        })
        .collect()
}

fn select_path<'a>(scope: ElementRef<'a>, path: &str) -> Vec<ElementRef<'a>> {
    let Some(steps) = parse_path(path) else {
        warn!(path, "invalid element path");
        return Vec::new();
    };

    let (mut current, rest) = if path.trim_start().starts_with('/') {
        let root = document_root(scope);
        let Some((first, rest)) = steps.split_first() else {
            return Vec::new();
        };
        if !first.matches_name(&root) || first.index.is_some_and(|n| n != 1) {
            return Vec::new();
        }
        (vec![root], rest)
    } else {
        (vec![scope], steps.as_slice())
    };

    for step in rest {
        current = current
            .into_iter()
            .flat_map(|node| step.children(node))
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

fn document_root(scope: ElementRef<'_>) -> ElementRef<'_> {
    scope
        .ancestors()
        .filter_map(ElementRef::wrap)
        .last()
        .unwrap_or(scope)
}

/// How a matched element turns into a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read {
    Text,
    Attribute(String),
    /// Text with a fixed label removed, e.g. `"Phone Number:"`.
    TextWithout(String),
}

impl Read {
    fn apply(&self, el: ElementRef<'_>) -> Option<String> {
        let value = match self {
            Read::Text => element_text(el),
            Read::Attribute(name) => el
                .value()
                .attr(name)
                .unwrap_or_default()
                .trim()
                .to_string(),
            Read::TextWithout(label) => element_text(el)
                .replace(label.as_str(), "")
                .trim()
                .to_string(),
        };
        non_blank(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Select { locator: Locator, read: Read },
    /// A `section` whose heading mentions `keyword`; yields the section's
    /// paragraphs joined by newlines.
    HeadedSection { keyword: String },
    /// The first paragraph longer than `min_chars` mentioning any keyword.
    LongParagraph {
        min_chars: usize,
        keywords: Vec<String>,
    },
}

impl Probe {
    pub fn text(locator: Locator) -> Self {
        Probe::Select {
            locator,
            read: Read::Text,
        }
    }

    pub fn attr(locator: Locator, name: impl Into<String>) -> Self {
        Probe::Select {
            locator,
            read: Read::Attribute(name.into()),
        }
    }

    pub fn text_without(locator: Locator, label: impl Into<String>) -> Self {
        Probe::Select {
            locator,
            read: Read::TextWithout(label.into()),
        }
    }

    pub fn headed_section(keyword: impl Into<String>) -> Self {
        Probe::HeadedSection {
            keyword: keyword.into(),
        }
    }

    pub fn long_paragraph<I, S>(min_chars: usize, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Probe::LongParagraph {
            min_chars,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    fn resolve(&self, scope: ElementRef<'_>) -> Option<String> {
        match self {
            Probe::Select { locator, read } => locator
                .select(scope)
                .into_iter()
                .find_map(|el| read.apply(el)),
            Probe::HeadedSection { keyword } => headed_section(scope, keyword),
            Probe::LongParagraph {
                min_chars,
                keywords,
            } => long_paragraph(scope, *min_chars, keywords),
        }
    }
}

fn headed_section(scope: ElementRef<'_>, keyword: &str) -> Option<String> {
    let keyword = keyword.to_lowercase();
    let sections = Locator::css("section").select(scope);
    let headings = Locator::css("h1, h2, h3, h4, h5, h6");
    let paragraphs = Locator::css("p");

    for section in sections {
        let mentions_keyword = headings
            .select(section)
            .into_iter()
            .any(|heading| element_text(heading).to_lowercase().contains(&keyword));
        if !mentions_keyword {
            continue;
        }
        let joined = paragraphs
            .select(section)
            .into_iter()
            .filter_map(|p| Read::Text.apply(p))
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

fn long_paragraph(
    scope: ElementRef<'_>,
    min_chars: usize,
    keywords: &[String],
) -> Option<String> {
    Locator::css("p")
        .select(scope)
        .into_iter()
        .filter_map(|p| Read::Text.apply(p))
        .find(|text| {
            let lower = text.to_lowercase();
            text.chars().count() > min_chars
                && keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strategy {
    probes: Vec<Probe>,
}

impl Strategy {
    pub fn new(probes: Vec<Probe>) -> Self {
        Self { probes }
    }

    /// First probe that yields a value, or `None`.
    pub fn resolve(&self, scope: ElementRef<'_>) -> Option<String> {
        self.probes.iter().find_map(|probe| probe.resolve(scope))
    }
}

/// Per-field extraction plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    First(Strategy),
    /// Every match, blanks and sentinels dropped, joined by `", "`.
    Joined { locator: Locator, read: Read },
}

pub fn extract_field(scope: ElementRef<'_>, strategy: &Strategy) -> String {
    strategy
        .resolve(scope)
        .unwrap_or_else(|| SENTINEL.to_string())
}

pub fn extract_joined(scope: ElementRef<'_>, locator: &Locator, read: &Read) -> String {
    let values = locator
        .select(scope)
        .into_iter()
        .filter_map(|el| read.apply(el))
        .collect::<Vec<_>>();
    if values.is_empty() {
        SENTINEL.to_string()
    } else {
        values.join(", ")
    }
}

/// Builds a fresh record from `plan`; fields not in the plan stay unresolved.
pub fn extract(scope: ElementRef<'_>, plan: &[(Field, Extraction)]) -> Record {
    let mut record = Record::default();
    for (field, extraction) in plan {
        let value = match extraction {
            Extraction::First(strategy) => extract_field(scope, strategy),
            Extraction::Joined { locator, read } => extract_joined(scope, locator, read),
        };
        record.set(*field, value);
    }
    record
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == SENTINEL {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    fn about_strategy() -> Strategy {
        Strategy::new(vec![
            Probe::text(Locator::path("/html/body/main/section[2]/div/p")),
            Probe::headed_section("about"),
            Probe::long_paragraph(100, ["about", "our company"]),
        ])
    }

    #[test]
    fn primary_path_wins_when_present() {
        let doc = Html::parse_document(
            r#"<html><body><main>
                <section><h2>About us</h2><p>Heading text</p></section>
                <section><div><p>  Family owned
                   since 1987. </p></div></section>
            </main></body></html>"#,
        );
        let value = extract_field(doc.root_element(), &about_strategy());
        assert_eq!(value, "Family owned since 1987.");
    }

    #[test]
    fn falls_back_to_section_with_about_heading() {
        let doc = Html::parse_document(
            r#"<html><body><main>
                <section><h2>Reviews</h2><p>Great job.</p></section>
                <section><h3>ABOUT Acme Roofing</h3>
                    <p>We replace roofs.</p><p> </p><p>Licensed and insured.</p>
                </section>
            </main></body></html>"#,
        );
        let value = extract_field(doc.root_element(), &about_strategy());
        assert_eq!(value, "We replace roofs.\nLicensed and insured.");
    }

    #[test]
    fn falls_back_to_long_keyword_paragraph() {
        let long = format!(
            "Our company has served the tri-state area {}",
            "with care ".repeat(10)
        );
        let short = "About us: short.";
        let html = format!(
            "<html><body><main><div><p>{short}</p><p>{long}</p></div></main></body></html>"
        );
        let doc = Html::parse_document(&html);
        let value = extract_field(doc.root_element(), &about_strategy());
        assert_eq!(value, normalize_text(&long));
    }

    #[test]
    fn unresolvable_field_is_sentinel() {
        let doc = Html::parse_document("<html><body><p>Nothing here</p></body></html>");
        assert_eq!(extract_field(doc.root_element(), &about_strategy()), SENTINEL);
    }

    #[test]
    fn blank_primary_falls_through() {
        let doc = Html::parse_document(
            r#"<html><body><span class="a">   </span><span class="b">found</span></body></html>"#,
        );
        let strategy = Strategy::new(vec![
            Probe::text(Locator::css("span.a")),
            Probe::text(Locator::css("span.b")),
        ]);
        assert_eq!(extract_field(doc.root_element(), &strategy), "found");
    }

    #[test]
    fn invalid_selector_is_a_miss() {
        let doc = Html::parse_document("<html><body><p>x</p></body></html>");
        let strategy = Strategy::new(vec![
            Probe::text(Locator::css("p[[")),
            Probe::text(Locator::path("/html/body/p[0]")),
        ]);
        assert_eq!(extract_field(doc.root_element(), &strategy), SENTINEL);
    }

    #[test]
    fn joined_values_skip_blanks_and_sentinels() {
        let doc = Html::parse_document(
            r#"<html><body><ul class="certs">
                <li>Master Elite</li><li>N/A</li><li>President's Club</li>
            </ul></body></html>"#,
        );
        let value = extract_joined(
            doc.root_element(),
            &Locator::css("ul.certs > li"),
            &Read::Text,
        );
        assert_eq!(value, "Master Elite, President's Club");

        let empty = extract_joined(doc.root_element(), &Locator::css("ol > li"), &Read::Text);
        assert_eq!(empty, SENTINEL);
    }

    #[test]
    fn phone_label_is_stripped_and_tel_link_is_fallback() {
        let strategy = Strategy::new(vec![
            Probe::text_without(Locator::css("a.phone"), "Phone Number:"),
            Probe::text_without(Locator::css("a[href*='tel:']"), "Phone Number:"),
        ]);
        let primary = Html::parse_document(
            r#"<html><body><a class="phone" href="tel:5550100">Phone Number: (555) 010-0100</a></body></html>"#,
        );
        assert_eq!(extract_field(primary.root_element(), &strategy), "(555) 010-0100");

        let fallback = Html::parse_document(
            r#"<html><body><a href="tel:5550199">(555) 010-0199</a></body></html>"#,
        );
        assert_eq!(extract_field(fallback.root_element(), &strategy), "(555) 010-0199");
    }

    #[test]
    fn path_steps_are_one_based_and_unindexed_steps_fan_out() {
        let doc = Html::parse_document(
            r#"<html><body>
                <div><p>a</p></div><div><p>b</p><p>c</p></div>
            </body></html>"#,
        );
        let texts = |path: &str| {
            Locator::path(path)
                .select(doc.root_element())
                .into_iter()
                .map(element_text)
                .collect::<Vec<_>>()
        };
        assert_eq!(texts("/html/body/div[2]/p[2]"), vec!["c"]);
        assert_eq!(texts("/html/body/div/p"), vec!["a", "b", "c"]);
        assert!(texts("/body/div").is_empty());
    }

    #[test]
    fn attribute_read_and_record_plan() {
        let doc = Html::parse_document(
            r#"<html><body><li><h2><a href="/c/acme"><span>Acme</span></a></h2></li></body></html>"#,
        );
        let plan = vec![
            (
                Field::Name,
                Extraction::First(Strategy::new(vec![Probe::text(Locator::css(
                    "h2 > a > span",
                ))])),
            ),
            (
                Field::DetailUrl,
                Extraction::First(Strategy::new(vec![Probe::attr(
                    Locator::css("h2 > a"),
                    "href",
                )])),
            ),
            (
                Field::Rating,
                Extraction::First(Strategy::new(vec![Probe::text(Locator::css(".stars"))])),
            ),
        ];
        let record = extract(doc.root_element(), &plan);
        assert_eq!(record.name, "Acme");
        assert_eq!(record.detail_url, "/c/acme");
        assert_eq!(record.rating, SENTINEL);
        assert_eq!(record.about_text, SENTINEL);
    }
}
