use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::debug;

static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(mon|tues|wednes|thurs|fri|satur|sun)day,\s*").unwrap()
});

/// How a field's raw text is cleaned after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRule {
    None,
    /// "Rockchip Chipset: RK3288" -> "RK3288"
    Label,
    /// "Last Modified: Tuesday, 3 May 2021" -> "3 May 2021"
    Date,
}

/// One entry of the page field map: where a field lives and how to clean it.
#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    css: String,
    selector: Selector,
    pub label: LabelRule,
}

impl FieldSpec {
    /// Selectors come from the fixed layout below, so a parse failure is a typo.
    fn new(name: &'static str, tag: &str, class: &str, label: LabelRule) -> Self {
        let css = format!("{}.{}", tag, class);
        let selector = Selector::parse(&css).unwrap();
        Self { name, css, selector, label }
    }

    fn cell(name: &'static str, class: &str) -> Self {
        Self::new(name, "td", class, LabelRule::None)
    }
}

// ── Listing row columns ──

pub static BRAND: LazyLock<FieldSpec> = LazyLock::new(|| FieldSpec::cell("brand", "brand"));
pub static MODEL: LazyLock<FieldSpec> = LazyLock::new(|| FieldSpec::cell("model", "model"));
pub static TITLE: LazyLock<FieldSpec> = LazyLock::new(|| FieldSpec::cell("title", "title"));
pub static STOCK_ROM: LazyLock<FieldSpec> =
    LazyLock::new(|| FieldSpec::cell("stock_rom", "stock-rom"));
pub static ANDROID_VERSION: LazyLock<FieldSpec> =
    LazyLock::new(|| FieldSpec::cell("android_version", "android-version"));
pub static AUTHOR: LazyLock<FieldSpec> = LazyLock::new(|| FieldSpec::cell("author", "author"));

// ── Detail page ──

pub static LAST_MODIFIED: LazyLock<FieldSpec> = LazyLock::new(|| {
    FieldSpec::new("last_modified", "span", "last-modified", LabelRule::Date)
});
pub static CHIPSET: LazyLock<FieldSpec> =
    LazyLock::new(|| FieldSpec::new("chipset", "span", "chipset", LabelRule::Label));

/// Text of the first `field.tag.field.class` under `container`, or "" if absent.
pub fn extract(container: ElementRef<'_>, field: &FieldSpec) -> String {
    let Some(element) = container.select(&field.selector).next() else {
        debug!("missing field {} ({})", field.name, field.css);
        return String::new();
    };
    let text = normalize(&element.text().collect::<String>());
    match field.label {
        LabelRule::None => text,
        LabelRule::Label => strip_label(&text).to_string(),
        LabelRule::Date => WEEKDAY_RE.replace(strip_label(&text), "").into_owned(),
    }
}

/// Drop line breaks entirely and trim surrounding whitespace.
pub fn normalize(raw: &str) -> String {
    raw.replace(['\r', '\n'], "").trim().to_string()
}

/// Everything after the first ':' (and the whitespace following it).
pub fn strip_label(text: &str) -> &str {
    match text.split_once(':') {
        Some((_, rest)) => rest.trim_start(),
        None => text,
    }
}
