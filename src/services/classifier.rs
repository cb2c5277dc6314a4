//! Stock-status decision engine.
//!
//! Turns raw page content into a [`Verdict`] plus a reason naming the rule
//! that fired. Pure: no I/O, no clock. Precedence, highest first:
//!
//! 1. caller-supplied target text (case-sensitive substring)
//! 2. the site table of a known retailer
//! 3. generic signals: enabled cart button, cart form, disabled cart button,
//!    out-of-stock phrase, in-stock phrase
//! 4. out-of-stock when nothing matched
//!
//! Hosts listed as structured use [`StockClassifier::classify_structured`],
//! which reads JSON-LD `offers.availability` before any text heuristics.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{ClassifierRules, Signal, SiteRule, Verdict};
use crate::utils::get_domain;

const FORM_SELECTOR: &str = "form";
const JSON_LD_SELECTOR: &str = "script[type=\"application/ld+json\"]";

static AVAILABILITY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(InStock|InStoreOnly|OnlineOnly|LimitedAvailability|PreOrder|PreSale|OutOfStock|SoldOut|Discontinued|BackOrder)",
    )
    .ok()
});

/// Verdict with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub verdict: Verdict,
    pub reason: String,
}

impl Classification {
    fn new(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }
}

/// A button whose label names a cart action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartButton {
    pub label: String,
    pub disabled: bool,
}

/// Signals extracted from one page.
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    /// Lower-cased visible text
    pub text: String,
    pub cart_buttons: Vec<CartButton>,
    pub has_cart_form: bool,
    pub out_of_stock_phrase: Option<String>,
    pub in_stock_phrase: Option<String>,
}

impl PageSignals {
    pub fn enabled_cart_button(&self) -> Option<&CartButton> {
        self.cart_buttons.iter().find(|b| !b.disabled)
    }

    pub fn disabled_cart_button(&self) -> Option<&CartButton> {
        self.cart_buttons.iter().find(|b| b.disabled)
    }
}

/// Rule-table driven stock classifier.
#[derive(Debug, Clone)]
pub struct StockClassifier {
    rules: ClassifierRules,
}

impl StockClassifier {
    /// Build a classifier, rejecting selectors that do not parse.
    pub fn new(rules: ClassifierRules) -> Result<Self> {
        rules.validate()?;
        parse_selector(&rules.button_selector)?;
        for site in &rules.sites {
            for check in &site.checks {
                if let Signal::Selector { selector } = &check.signal {
                    parse_selector(selector)?;
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// Classify a page, routing structured-data hosts to the JSON-LD path.
    pub fn classify(&self, html: &str, url: &str, target_text: Option<&str>) -> Classification {
        let host = get_domain(url).unwrap_or_default();
        if self.rules.is_structured_host(&host) {
            return self.classify_structured(html, url, target_text);
        }

        if let Some(result) = Self::precheck(html, target_text) {
            return result;
        }

        let document = Html::parse_document(html);
        let signals = self.extract_signals(&document);

        if let Some(site) = self.rules.site_for(&host) {
            if let Some(result) = self.apply_site_rule(site, &signals, &document) {
                log::debug!("{} -> {} ({})", url, result.verdict, result.reason);
                return result;
            }
        }

        let result = Self::generic_verdict(&signals);
        log::debug!("{} -> {} ({})", url, result.verdict, result.reason);
        result
    }

    /// JSON-LD availability first, then phrases, then buttons.
    pub fn classify_structured(
        &self,
        html: &str,
        url: &str,
        target_text: Option<&str>,
    ) -> Classification {
        if let Some(result) = Self::precheck(html, target_text) {
            return result;
        }

        let document = Html::parse_document(html);
        if let Some(result) = Self::structured_availability(&document) {
            log::debug!("{} -> {} ({})", url, result.verdict, result.reason);
            return result;
        }

        let signals = self.extract_signals(&document);
        let result = if let Some(phrase) = &signals.out_of_stock_phrase {
            Classification::new(
                Verdict::OutOfStock,
                format!("out-of-stock phrase \"{phrase}\""),
            )
        } else if let Some(phrase) = &signals.in_stock_phrase {
            Classification::new(Verdict::InStock, format!("in-stock phrase \"{phrase}\""))
        } else if let Some(button) = signals.enabled_cart_button() {
            Classification::new(
                Verdict::InStock,
                format!("enabled cart button \"{}\"", button.label),
            )
        } else if let Some(button) = signals.disabled_cart_button() {
            Classification::new(
                Verdict::OutOfStock,
                format!("disabled cart button \"{}\"", button.label),
            )
        } else {
            Classification::new(Verdict::OutOfStock, "no availability signal found")
        };
        log::debug!("{} -> {} ({})", url, result.verdict, result.reason);
        result
    }

    /// Target text decides alone; otherwise empty content is an error.
    fn precheck(html: &str, target_text: Option<&str>) -> Option<Classification> {
        let Some(target) = target_text.filter(|t| !t.trim().is_empty()) else {
            return html
                .trim()
                .is_empty()
                .then(|| Classification::new(Verdict::Error, "empty page content"));
        };
        Some(if html.contains(target) {
            Classification::new(Verdict::InStock, format!("target text \"{target}\" present"))
        } else {
            Classification::new(
                Verdict::OutOfStock,
                format!("target text \"{target}\" absent"),
            )
        })
    }

    /// Collect buttons, forms and phrases from a parsed page.
    pub fn extract_signals(&self, document: &Html) -> PageSignals {
        let text = visible_text(document);

        let cart_buttons = match Selector::parse(&self.rules.button_selector) {
            Ok(selector) => document
                .select(&selector)
                .filter_map(|el| self.cart_button(el))
                .collect(),
            Err(_) => Vec::new(),
        };

        let has_cart_form = match Selector::parse(FORM_SELECTOR) {
            Ok(selector) => document.select(&selector).any(|form| {
                let markup = form.html().to_lowercase();
                self.rules
                    .cart_form_markers
                    .iter()
                    .any(|marker| markup.contains(marker.as_str()))
            }),
            Err(_) => false,
        };

        let out_of_stock_phrase = first_phrase(&text, &self.rules.out_of_stock_phrases);
        let in_stock_phrase = first_phrase(&text, &self.rules.in_stock_phrases);

        PageSignals {
            text,
            cart_buttons,
            has_cart_form,
            out_of_stock_phrase,
            in_stock_phrase,
        }
    }

    fn cart_button(&self, el: ElementRef<'_>) -> Option<CartButton> {
        let value = el.value();
        let mut label = el.text().collect::<Vec<_>>().join(" ");
        for attr in ["value", "aria-label"] {
            if let Some(extra) = value.attr(attr) {
                label.push(' ');
                label.push_str(extra);
            }
        }
        let label = normalize_whitespace(&label).to_lowercase();

        let phrase = self
            .rules
            .cart_phrases
            .iter()
            .find(|phrase| label.contains(phrase.as_str()))?;

        Some(CartButton {
            label: phrase.clone(),
            disabled: self.is_disabled(el),
        })
    }

    fn is_disabled(&self, el: ElementRef<'_>) -> bool {
        let value = el.value();
        if value.attr("disabled").is_some() {
            return true;
        }
        if value
            .attr("aria-disabled")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
        {
            return true;
        }
        let marker_text = value
            .attrs()
            .filter(|(name, _)| *name == "class" || *name == "id" || name.starts_with("data-"))
            .map(|(_, v)| v.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        self.rules
            .disabled_markers
            .iter()
            .any(|marker| marker_text.contains(marker.as_str()))
    }

    fn apply_site_rule(
        &self,
        site: &SiteRule,
        signals: &PageSignals,
        document: &Html,
    ) -> Option<Classification> {
        for check in &site.checks {
            if let Some(detail) = Self::signal_fires(&check.signal, signals, document) {
                return Some(Classification::new(
                    check.verdict,
                    format!("site rule '{}': {}", site.name, detail),
                ));
            }
        }
        site.fallback.map(|verdict| {
            Classification::new(verdict, format!("site rule '{}': fallback", site.name))
        })
    }

    /// Description of the evidence when `signal` is present on the page.
    fn signal_fires(signal: &Signal, signals: &PageSignals, document: &Html) -> Option<String> {
        match signal {
            Signal::Text { text } => {
                let needle = text.to_lowercase();
                signals
                    .text
                    .contains(&needle)
                    .then(|| format!("text \"{needle}\""))
            }
            Signal::Selector { selector } => {
                let parsed = Selector::parse(selector).ok()?;
                document
                    .select(&parsed)
                    .next()
                    .map(|_| format!("selector {selector}"))
            }
            Signal::EnabledCartButton => signals
                .enabled_cart_button()
                .map(|b| format!("enabled cart button \"{}\"", b.label)),
            Signal::DisabledCartButton => signals
                .disabled_cart_button()
                .map(|b| format!("disabled cart button \"{}\"", b.label)),
            Signal::CartForm => signals.has_cart_form.then(|| "add-to-cart form".to_string()),
            Signal::OutOfStockPhrase => signals
                .out_of_stock_phrase
                .as_ref()
                .map(|p| format!("out-of-stock phrase \"{p}\"")),
            Signal::InStockPhrase => signals
                .in_stock_phrase
                .as_ref()
                .map(|p| format!("in-stock phrase \"{p}\"")),
        }
    }

    /// Generic fallback precedence; never defaults to in-stock.
    fn generic_verdict(signals: &PageSignals) -> Classification {
        if let Some(button) = signals.enabled_cart_button() {
            return Classification::new(
                Verdict::InStock,
                format!("enabled cart button \"{}\"", button.label),
            );
        }
        if signals.has_cart_form && signals.out_of_stock_phrase.is_none() {
            return Classification::new(Verdict::InStock, "add-to-cart form present");
        }
        if let Some(button) = signals.disabled_cart_button() {
            return Classification::new(
                Verdict::OutOfStock,
                format!("disabled cart button \"{}\"", button.label),
            );
        }
        if let Some(phrase) = &signals.out_of_stock_phrase {
            return Classification::new(
                Verdict::OutOfStock,
                format!("out-of-stock phrase \"{phrase}\""),
            );
        }
        if let Some(phrase) = &signals.in_stock_phrase {
            return Classification::new(Verdict::InStock, format!("in-stock phrase \"{phrase}\""));
        }
        Classification::new(Verdict::OutOfStock, "no availability signal found")
    }

    /// Verdict from JSON-LD offers, if any declare availability.
    fn structured_availability(document: &Html) -> Option<Classification> {
        let selector = Selector::parse(JSON_LD_SELECTOR).ok()?;
        let mut found = Vec::new();
        for script in document.select(&selector) {
            let raw = script.text().collect::<String>();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => collect_availability(&value, &mut found),
                Err(e) => log::debug!("Skipping malformed JSON-LD block: {}", e),
            }
        }

        let pattern = AVAILABILITY.as_ref()?;
        let tokens: Vec<String> = found
            .iter()
            .filter_map(|raw| pattern.captures(raw))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_lowercase()))
            .collect();

        if let Some(token) = tokens.iter().find(|t| is_available_token(t)) {
            return Some(Classification::new(
                Verdict::InStock,
                format!("JSON-LD availability {token}"),
            ));
        }
        tokens.first().map(|token| {
            Classification::new(
                Verdict::OutOfStock,
                format!("JSON-LD availability {token}"),
            )
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased text outside `script`/`style`/`noscript`.
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    normalize_whitespace(&out).to_lowercase()
}

fn first_phrase(text: &str, phrases: &[String]) -> Option<String> {
    phrases
        .iter()
        .find(|phrase| text.contains(&phrase.to_lowercase()))
        .cloned()
}

fn collect_availability(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_availability(v, found)),
        Value::Object(map) => {
            if let Some(offers) = map.get("offers") {
                collect_offer_availability(offers, found);
            }
            for (key, nested) in map {
                if key != "offers" {
                    collect_availability(nested, found);
                }
            }
        }
        _ => {}
    }
}

fn collect_offer_availability(offers: &Value, found: &mut Vec<String>) {
    match offers {
        Value::Array(items) => items
            .iter()
            .for_each(|offer| collect_offer_availability(offer, found)),
        Value::Object(map) => {
            if let Some(availability) = map.get("availability").and_then(Value::as_str) {
                found.push(availability.to_string());
            }
            // AggregateOffer nests its offers
            if let Some(nested) = map.get("offers") {
                collect_offer_availability(nested, found);
            }
        }
        _ => {}
    }
}

fn is_available_token(token: &str) -> bool {
    matches!(
        token,
        "instock" | "instoreonly" | "onlineonly" | "limitedavailability" | "preorder" | "presale"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> StockClassifier {
        StockClassifier::new(ClassifierRules::default()).unwrap()
    }

    const SHOP: &str = "https://cards.example.com/product/1";

    #[test]
    fn test_enabled_cart_button_is_in_stock() {
        let html = r#"<html><body><h1>Booster Box</h1>
            <button class="btn primary">Add to Cart</button></body></html>"#;
        let result = classifier().classify(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::InStock);
        assert!(result.reason.contains("enabled cart button"));
    }

    #[test]
    fn test_disabled_cart_button_is_out_of_stock() {
        let html = r#"<html><body>
            <button class="btn" disabled>Add to Cart</button></body></html>"#;
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_disabled_marker_in_class() {
        let html = r#"<button class="btn btn--sold-out">Buy Now</button>"#;
        let result = classifier().classify(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert!(result.reason.contains("disabled cart button"));
    }

    #[test]
    fn test_aria_disabled() {
        let html = r#"<a role="button" aria-disabled="true">Preorder</a>"#;
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_input_value_counts_as_label() {
        let html = r#"<form action="/cart"><input type="submit" value="Add to basket"></form>"#;
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::InStock
        );
    }

    #[test]
    fn test_no_signal_defaults_to_out_of_stock() {
        let html = "<html><body><p>Welcome to our store.</p></body></html>";
        let result = classifier().classify(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert_eq!(result.reason, "no availability signal found");
    }

    #[test]
    fn test_out_of_stock_phrase_beats_in_stock_phrase() {
        let html = "<p>Currently unavailable. Usually in stock within a week.</p>";
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_in_stock_phrase() {
        let html = "<p>In Stock - ships today</p>";
        let result = classifier().classify(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::InStock);
        assert!(result.reason.contains("in-stock phrase"));
    }

    #[test]
    fn test_cart_form_without_oos_phrase() {
        let html = r#"<form id="add-to-cart-form"><select name="qty"></select></form>"#;
        let result = classifier().classify(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::InStock);
        assert_eq!(result.reason, "add-to-cart form present");
    }

    #[test]
    fn test_cart_form_with_oos_phrase() {
        let html = r#"<form class="add-to-cart"></form><p>Sold out</p>"#;
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_phrases_inside_scripts_are_ignored() {
        let html = r#"<script>var label = "in stock";</script><p>Hello</p>"#;
        assert_eq!(
            classifier().classify(html, SHOP, None).verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_target_text_overrides_everything() {
        let html = r#"<button>Add to Cart</button><p>In stock</p>"#;
        let c = classifier();
        assert_eq!(
            c.classify(html, SHOP, Some("Restock Alert")).verdict,
            Verdict::OutOfStock
        );

        let html = r#"<button disabled>Add to Cart</button><p>Sold out</p><p>Restock Alert</p>"#;
        assert_eq!(
            c.classify(html, SHOP, Some("Restock Alert")).verdict,
            Verdict::InStock
        );
    }

    #[test]
    fn test_target_text_is_case_sensitive() {
        let html = "<p>restock alert</p>";
        assert_eq!(
            classifier()
                .classify(html, SHOP, Some("Restock Alert"))
                .verdict,
            Verdict::OutOfStock
        );
    }

    #[test]
    fn test_blank_target_text_is_ignored() {
        let html = r#"<button>Add to Cart</button>"#;
        assert_eq!(
            classifier().classify(html, SHOP, Some("  ")).verdict,
            Verdict::InStock
        );
    }

    #[test]
    fn test_empty_content_is_error() {
        let result = classifier().classify("   ", SHOP, None);
        assert_eq!(result.verdict, Verdict::Error);
    }

    #[test]
    fn test_empty_content_with_target_is_out_of_stock() {
        let result = classifier().classify("", SHOP, Some("In Stock Now"));
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert!(result.reason.contains("absent"));
    }

    #[test]
    fn test_site_sold_out_literal_is_authoritative() {
        // Generic rules alone would say in-stock because of the enabled button.
        let html = r#"<button>Add to Cart</button><span>SOLD OUT</span>"#;
        let result = classifier().classify(html, "https://www.pokemoncenter.com/product/x", None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert!(result.reason.starts_with("site rule 'pokemon_center'"));
    }

    #[test]
    fn test_site_pickup_affordance_is_authoritative() {
        let html = r#"<div data-test="fulfillment-cell-pickup"><button>Pick it up</button></div>
            <p>Out of stock for shipping</p>"#;
        let result = classifier().classify(html, "https://www.target.com/p/booster", None);
        assert_eq!(result.verdict, Verdict::InStock);
    }

    #[test]
    fn test_site_fallback_applies() {
        let html = r#"<button>Add to Cart</button>"#;
        let result = classifier().classify(html, "https://www.target.com/p/booster", None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert_eq!(result.reason, "site rule 'target': fallback");
    }

    #[test]
    fn test_site_without_match_defers_to_generic() {
        let html = r#"<p>In stock</p>"#;
        let result = classifier().classify(html, "https://www.bestbuy.com/site/x", None);
        assert_eq!(result.verdict, Verdict::InStock);
        assert!(!result.reason.starts_with("site rule"));
    }

    #[test]
    fn test_best_buy_button_state() {
        let html = r#"<button class="add-to-cart-button" data-button-state="SOLD_OUT">Sold Out</button>"#;
        let result = classifier().classify(html, "https://www.bestbuy.com/site/x", None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert!(result.reason.contains("best_buy"));
    }

    #[test]
    fn test_structured_availability_first() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@context":"https://schema.org","@type":"Product","name":"Booster",
             "offers":{"@type":"Offer","availability":"https://schema.org/InStock"}}
            </script></head><body><p>Sold out</p></body></html>"#;
        let result = classifier().classify_structured(html, "https://www.tcgplayer.com/p/1", None);
        assert_eq!(result.verdict, Verdict::InStock);
        assert!(result.reason.contains("JSON-LD"));
    }

    #[test]
    fn test_structured_graph_and_aggregate_offers() {
        let html = r#"<script type="application/ld+json">
            {"@graph":[{"@type":"Product","offers":{"@type":"AggregateOffer",
              "offers":[{"availability":"http://schema.org/OutOfStock"}]}}]}
            </script><button>Add to Cart</button>"#;
        let result = classifier().classify_structured(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
    }

    #[test]
    fn test_structured_phrases_before_buttons() {
        let html = r#"<script type="application/ld+json">{not json}</script>
            <p>Sold out</p><button>Add to Cart</button>"#;
        let result = classifier().classify_structured(html, SHOP, None);
        assert_eq!(result.verdict, Verdict::OutOfStock);
        assert!(result.reason.contains("out-of-stock phrase"));
    }

    #[test]
    fn test_structured_hosts_are_routed() {
        let html = r#"<script type="application/ld+json">
            {"offers":[{"availability":"OutOfStock"}]}</script><button>Add to Cart</button>"#;
        let c = classifier();
        assert_eq!(
            c.classify(html, "https://shop.tcgplayer.com/x", None).verdict,
            Verdict::OutOfStock
        );
        assert_eq!(c.classify(html, SHOP, None).verdict, Verdict::InStock);
    }

    #[test]
    fn test_invalid_site_selector_is_rejected() {
        let mut rules = ClassifierRules::default();
        rules.sites[0].checks.push(crate::models::SiteCheck {
            signal: Signal::Selector {
                selector: "[[broken".into(),
            },
            verdict: Verdict::InStock,
        });
        assert!(StockClassifier::new(rules).is_err());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let html = r#"<button>Add to Cart</button><p>Sold out</p>"#;
        let c = classifier();
        let first = c.classify(html, SHOP, None);
        for _ in 0..5 {
            assert_eq!(c.classify(html, SHOP, None), first);
        }
    }
}
