//! Stock classification rule table.
//!
//! Phrase lists and the per-site decision tables are plain configuration
//! data, so adding a retailer or a locale is a config change.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::MonitorStatus;
use crate::error::{AppError, Result};

/// Classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    InStock,
    OutOfStock,
    Unknown,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MonitorStatus::from(*self).as_str())
    }
}

impl From<Verdict> for MonitorStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::InStock => MonitorStatus::InStock,
            Verdict::OutOfStock => MonitorStatus::OutOfStock,
            Verdict::Unknown => MonitorStatus::Unknown,
            Verdict::Error => MonitorStatus::Error,
        }
    }
}

/// A page signal a site table can test for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// Case-insensitive literal in the visible page text
    Text { text: String },
    /// At least one element matches the CSS selector
    Selector { selector: String },
    EnabledCartButton,
    DisabledCartButton,
    CartForm,
    OutOfStockPhrase,
    InStockPhrase,
}

/// One row of a site decision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCheck {
    pub signal: Signal,
    pub verdict: Verdict,
}

/// Decision table for a known retailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRule {
    /// Rule name for identification
    pub name: String,

    /// Hosts the rule applies to (subdomains included)
    pub hosts: Vec<String>,

    /// Verdict when no check fires; `None` defers to the generic rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Verdict>,

    /// Checks in precedence order; the first firing one decides
    #[serde(default)]
    pub checks: Vec<SiteCheck>,
}

impl SiteRule {
    /// Whether `host` is one of this site's hosts or a subdomain of one.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        self.hosts.iter().any(|h| {
            let h = h.to_lowercase();
            host == h || host.ends_with(&format!(".{h}"))
        })
    }
}

/// Full rule table for the stock classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Phrases that make a button a cart action
    #[serde(default = "defaults::cart_phrases")]
    pub cart_phrases: Vec<String>,

    /// Markers in button attributes meaning the button is disabled
    #[serde(default = "defaults::disabled_markers")]
    pub disabled_markers: Vec<String>,

    /// Markers in a form's markup meaning it is an add-to-cart form
    #[serde(default = "defaults::cart_form_markers")]
    pub cart_form_markers: Vec<String>,

    #[serde(default = "defaults::out_of_stock_phrases")]
    pub out_of_stock_phrases: Vec<String>,

    #[serde(default = "defaults::in_stock_phrases")]
    pub in_stock_phrases: Vec<String>,

    /// CSS selector for button-like elements
    #[serde(default = "defaults::button_selector")]
    pub button_selector: String,

    /// Hosts classified from JSON-LD structured data first
    #[serde(default = "defaults::structured_hosts")]
    pub structured_hosts: Vec<String>,

    /// Retailer-specific decision tables
    #[serde(default = "defaults::sites")]
    pub sites: Vec<SiteRule>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            cart_phrases: defaults::cart_phrases(),
            disabled_markers: defaults::disabled_markers(),
            cart_form_markers: defaults::cart_form_markers(),
            out_of_stock_phrases: defaults::out_of_stock_phrases(),
            in_stock_phrases: defaults::in_stock_phrases(),
            button_selector: defaults::button_selector(),
            structured_hosts: defaults::structured_hosts(),
            sites: defaults::sites(),
        }
    }
}

impl ClassifierRules {
    /// Validate the table for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.cart_phrases.is_empty() {
            return Err(AppError::validation("classifier.cart_phrases is empty"));
        }
        if self.button_selector.trim().is_empty() {
            return Err(AppError::validation("classifier.button_selector is empty"));
        }
        for site in &self.sites {
            if site.hosts.is_empty() {
                return Err(AppError::validation(format!(
                    "site rule '{}' has no hosts",
                    site.name
                )));
            }
        }
        Ok(())
    }

    /// Find the site table for a host.
    pub fn site_for(&self, host: &str) -> Option<&SiteRule> {
        self.sites.iter().find(|site| site.matches_host(host))
    }

    /// Whether a host should use the structured-data classifier.
    pub fn is_structured_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.structured_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }
}

mod defaults {
    use super::{Signal, SiteCheck, SiteRule, Verdict};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub fn cart_phrases() -> Vec<String> {
        strings(&[
            "add to cart",
            "add to basket",
            "buy now",
            "purchase",
            "checkout",
            "preorder",
            "shop now",
            "get it now",
        ])
    }

    pub fn disabled_markers() -> Vec<String> {
        strings(&["disabled", "out-of-stock", "sold-out", "unavailable"])
    }

    pub fn cart_form_markers() -> Vec<String> {
        strings(&["add to cart", "add-to-cart", "addtocart", "add_to_cart"])
    }

    pub fn out_of_stock_phrases() -> Vec<String> {
        strings(&[
            "out of stock",
            "sold out",
            "currently unavailable",
            "not available",
            "back in stock",
            "notify me when available",
            "temporarily unavailable",
            "no longer available",
        ])
    }

    pub fn in_stock_phrases() -> Vec<String> {
        strings(&[
            "in stock",
            "available",
            "ships today",
            "add to cart",
            "ready to ship",
        ])
    }

    pub fn button_selector() -> String {
        "button, input[type=\"submit\"], input[type=\"button\"], [role=\"button\"], \
         a[class*=\"btn\"], a[class*=\"button\"]"
            .into()
    }

    pub fn structured_hosts() -> Vec<String> {
        strings(&["tcgplayer.com"])
    }

    fn text(text: &str, verdict: Verdict) -> SiteCheck {
        SiteCheck {
            signal: Signal::Text { text: text.into() },
            verdict,
        }
    }

    fn selector(selector: &str, verdict: Verdict) -> SiteCheck {
        SiteCheck {
            signal: Signal::Selector {
                selector: selector.into(),
            },
            verdict,
        }
    }

    pub fn sites() -> Vec<SiteRule> {
        vec![
            SiteRule {
                name: "pokemon_center".into(),
                hosts: strings(&["pokemoncenter.com"]),
                checks: vec![
                    text("sold out", Verdict::OutOfStock),
                    SiteCheck {
                        signal: Signal::EnabledCartButton,
                        verdict: Verdict::InStock,
                    },
                ],
                fallback: None,
            },
            SiteRule {
                name: "target".into(),
                hosts: strings(&["target.com"]),
                checks: vec![
                    selector(
                        "button[data-test=\"orderPickupButton\"], \
                         [data-test=\"fulfillment-cell-pickup\"] button",
                        Verdict::InStock,
                    ),
                    text("sold out", Verdict::OutOfStock),
                    text("out of stock", Verdict::OutOfStock),
                ],
                fallback: Some(Verdict::OutOfStock),
            },
            SiteRule {
                name: "best_buy".into(),
                hosts: strings(&["bestbuy.com"]),
                checks: vec![
                    selector(
                        "button.add-to-cart-button[data-button-state=\"SOLD_OUT\"]",
                        Verdict::OutOfStock,
                    ),
                    selector(
                        "button.add-to-cart-button[data-button-state=\"ADD_TO_CART\"]",
                        Verdict::InStock,
                    ),
                    text("coming soon", Verdict::OutOfStock),
                ],
                fallback: None,
            },
            SiteRule {
                name: "walmart".into(),
                hosts: strings(&["walmart.com"]),
                checks: vec![
                    text("out of stock", Verdict::OutOfStock),
                    SiteCheck {
                        signal: Signal::EnabledCartButton,
                        verdict: Verdict::InStock,
                    },
                ],
                fallback: None,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_validate() {
        assert!(ClassifierRules::default().validate().is_ok());
    }

    #[test]
    fn test_site_host_matching() {
        let rules = ClassifierRules::default();
        assert_eq!(rules.site_for("www.target.com").unwrap().name, "target");
        assert_eq!(rules.site_for("target.com").unwrap().name, "target");
        assert!(rules.site_for("nottarget.com").is_none());
        assert!(rules.site_for("example.com").is_none());
    }

    #[test]
    fn test_structured_hosts() {
        let rules = ClassifierRules::default();
        assert!(rules.is_structured_host("www.tcgplayer.com"));
        assert!(!rules.is_structured_host("walmart.com"));
    }

    #[test]
    fn test_site_rules_from_toml() {
        let toml_str = r#"
            [[sites]]
            name = "local_shop"
            hosts = ["cards.example"]
            fallback = "out-of-stock"

            [[sites.checks]]
            verdict = "in-stock"
            signal = { kind = "text", text = "ready for pickup" }

            [[sites.checks]]
            verdict = "out-of-stock"
            signal = { kind = "disabled_cart_button" }
        "#;
        let rules: ClassifierRules = toml::from_str(toml_str).unwrap();
        assert_eq!(rules.sites.len(), 1);
        assert_eq!(rules.sites[0].checks.len(), 2);
        assert_eq!(rules.sites[0].fallback, Some(Verdict::OutOfStock));
        assert!(!rules.cart_phrases.is_empty());
    }
}
