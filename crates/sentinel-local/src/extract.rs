use serde::Serialize;
use std::io::Cursor;

/// Convert HTML to readable plain text.
///
/// Deterministic and "good enough"; not a readability engine.
pub fn html_to_text(html: &str, width: usize) -> String {
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

/// Extract text from an in-memory PDF body.
///
/// Quality varies by PDF (text layer vs scanned images). CPU-bound: call from a blocking task.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

pub fn bytes_look_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// First `max_chars` characters of `s`, and whether anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => (s[..byte].to_string(), true),
        None => (s.to_string(), false),
    }
}

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_boilerplate_container(el: &html_scraper::ElementRef) -> bool {
    let s = class_or_id_lc(el);
    if s.is_empty() {
        return false;
    }
    [
        "nav",
        "navbar",
        "menu",
        "sidebar",
        "footer",
        "header",
        "banner",
        "cookie",
        "consent",
        "ads",
        "advert",
        "promo",
        "subscribe",
        "newsletter",
        "related",
        "comments",
    ]
    .iter()
    .any(|bad| s.contains(bad))
}

fn element_text_chars(el: &html_scraper::ElementRef) -> usize {
    el.text().map(|t| t.chars().count()).sum()
}

fn element_link_text_chars(el: &html_scraper::ElementRef) -> usize {
    let Ok(sel) = html_scraper::Selector::parse("a") else {
        return 0;
    };
    el.select(&sel)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

/// Pick the densest non-link block, favouring `<article>` and `<main>`.
fn pick_main_text(doc: &html_scraper::Html, max_elems: usize) -> Option<String> {
    let sel = html_scraper::Selector::parse("article, main, section, div").ok()?;
    let mut best_score: i64 = 0;
    let mut best_text: Option<String> = None;

    for el in doc.select(&sel).take(max_elems.clamp(50, 50_000)) {
        if is_boilerplate_container(&el) {
            continue;
        }
        let txt = element_text_chars(&el);
        if txt < 20 {
            continue;
        }
        let link_txt = element_link_text_chars(&el);
        let mut score = txt as i64 - 2 * (link_txt as i64);
        match el.value().name() {
            "article" => score += 500,
            "main" => score += 300,
            _ => {}
        }
        if link_txt > txt / 2 {
            score -= 500;
        }
        if score > best_score {
            best_score = score;
            best_text = Some(norm_ws(&el.text().collect::<Vec<_>>().join(" ")));
        }
    }

    best_text.filter(|t| has_any_text(t))
}

/// Minimal stripper for `<tag ...> ... </tag>` blocks (ASCII case-insensitive).
fn strip_tag_blocks(html: &str, tag: &str) -> String {
    let tag_lc = tag.to_ascii_lowercase();
    let open_pat = format!("<{tag_lc}");
    let close_pat = format!("</{tag_lc}>");

    let mut out = String::new();
    let mut i = 0usize;
    let lower = html.to_ascii_lowercase();
    while let Some(rel_start) = lower[i..].find(&open_pat) {
        let start = i + rel_start;
        let after_open = start + open_pat.len();
        let Some(rel_end) = lower[after_open..].find(&close_pat) else {
            break;
        };
        out.push_str(&html[i..start]);
        i = after_open + rel_end + close_pat.len();
    }
    out.push_str(&html[i..]);
    out
}

fn quality_score(s: &str) -> i64 {
    let non_ws = s.chars().filter(|c| !c.is_whitespace()).count() as i64;
    let url_hits = s.matches("http").count() as i64;
    let mut score = non_ws - 200 * url_hits;

    // Menus render as many short lines.
    let short_lines = s
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && l.chars().count() <= 30)
        .count() as i64;
    score -= 20 * short_lines;

    let sl = s.to_ascii_lowercase();
    for needle in [
        "sign up", "log in", "login", "cookie", "consent", "privacy", "terms",
    ] {
        score -= 250 * sl.matches(needle).count() as i64;
    }
    score
}

/// Readable parts of a news/article page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Article {
    pub title: Option<String>,
    pub text: String,
    pub publish_date: Option<String>,
    pub authors: Vec<String>,
    pub top_image: Option<String>,
}

impl Article {
    /// Flatten into the plain-text layout handed to the assessor.
    ///
    /// Empty when the page has no body text; metadata alone is not a usable document.
    pub fn render(&self) -> String {
        if !has_any_text(&self.text) {
            return String::new();
        }
        let mut out = String::new();
        if let Some(t) = &self.title {
            out.push_str(&format!("Title: {t}\n\n"));
        }
        out.push_str(self.text.trim());
        if let Some(d) = &self.publish_date {
            out.push_str(&format!("\n\nPublish Date: {d}"));
        }
        if !self.authors.is_empty() {
            out.push_str(&format!("\n\nAuthors: {}", self.authors.join(", ")));
        }
        if let Some(img) = &self.top_image {
            out.push_str(&format!("\n\nTop Image URL: {img}"));
        }
        out
    }
}

fn first_text(doc: &html_scraper::Html, selector: &str) -> Option<String> {
    let sel = html_scraper::Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    let t = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
    (!t.is_empty()).then_some(t)
}

fn first_attr(doc: &html_scraper::Html, selector: &str, attr: &str) -> Option<String> {
    let sel = html_scraper::Selector::parse(selector).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn all_attrs(doc: &html_scraper::Html, selector: &str, attr: &str) -> Vec<String> {
    let Ok(sel) = html_scraper::Selector::parse(selector) else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Extract title, body text and common metadata from an HTML page.
pub fn extract_article(html: &str, width: usize) -> Article {
    let html = strip_tag_blocks(html, "script");
    let html = strip_tag_blocks(&html, "style");
    let html = strip_tag_blocks(&html, "noscript");
    let doc = html_scraper::Html::parse_document(&html);

    let title = first_attr(&doc, "meta[property=\"og:title\"]", "content")
        .or_else(|| first_text(&doc, "title"))
        .or_else(|| first_text(&doc, "h1"));

    let publish_date = first_attr(&doc, "meta[property=\"article:published_time\"]", "content")
        .or_else(|| first_attr(&doc, "meta[name=\"date\"]", "content"))
        .or_else(|| first_attr(&doc, "meta[name=\"pubdate\"]", "content"))
        .or_else(|| first_attr(&doc, "time[datetime]", "datetime"));

    let mut authors: Vec<String> = Vec::new();
    for a in all_attrs(&doc, "meta[name=\"author\"]", "content")
        .into_iter()
        .chain(all_attrs(&doc, "meta[property=\"article:author\"]", "content"))
    {
        if !authors.contains(&a) {
            authors.push(a);
        }
    }

    let top_image = first_attr(&doc, "meta[property=\"og:image\"]", "content");

    let full = html_to_text(&html, width);
    let text = match pick_main_text(&doc, 20_000) {
        Some(main) if !has_any_text(&full) || quality_score(&main) >= quality_score(&full) + 300 => {
            main
        }
        _ if has_any_text(&full) => full.trim().to_string(),
        _ => String::new(),
    };

    Article {
        title,
        text,
        publish_date,
        authors,
        top_image,
    }
}
