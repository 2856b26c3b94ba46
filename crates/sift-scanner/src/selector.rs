//! CSS-selector driven [`Extractor`].

use crate::extractor::{ExtractionError, Extractor};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sift_browser::LoadedPage;
use sift_core::{ExtractorConfig, Record};
use std::collections::BTreeMap;

/// Extractor configured entirely from [`ExtractorConfig`] selectors.
#[derive(Debug)]
pub struct SelectorExtractor {
    item: Selector,
    id_attribute: String,
    title: Selector,
    price: Option<Selector>,
    image: Option<Selector>,
    condition: Option<Selector>,
    shipping: Option<Selector>,
    link: Selector,
    listing_fields: Vec<(String, Selector)>,
    total_count: Option<Selector>,
    end_of_results: Option<Selector>,
    detail_fields: BTreeMap<String, Selector>,
    count_pattern: Regex,
}

impl SelectorExtractor {
    /// Compile every selector up front so bad configuration fails at startup.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractionError> {
        let optional = |sel: &Option<String>| sel.as_deref().map(parse_selector).transpose();

        let listing_fields = config
            .listing_fields
            .iter()
            .map(|(name, sel)| Ok((name.clone(), parse_selector(sel)?)))
            .collect::<Result<Vec<_>, ExtractionError>>()?;
        let detail_fields = config
            .detail_fields
            .iter()
            .map(|(name, sel)| Ok((name.clone(), parse_selector(sel)?)))
            .collect::<Result<BTreeMap<_, _>, ExtractionError>>()?;

        Ok(Self {
            item: parse_selector(&config.item)?,
            id_attribute: config.id_attribute.clone(),
            title: parse_selector(&config.title)?,
            price: optional(&config.price)?,
            image: optional(&config.image)?,
            condition: optional(&config.condition)?,
            shipping: optional(&config.shipping)?,
            link: parse_selector(&config.link)?,
            listing_fields,
            total_count: optional(&config.total_count)?,
            end_of_results: optional(&config.end_of_results)?,
            detail_fields,
            count_pattern: Regex::new(r"\d[\d,.]*")
                .map_err(|e| ExtractionError::new(e.to_string()))?,
        })
    }

    fn parse_item(&self, item: &ElementRef, base_url: &str) -> Option<Record> {
        let href = item
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr("href"))?;
        let url = resolve_url(base_url, href);

        let id = item
            .value()
            .attr(&self.id_attribute)
            .map(str::to_string)
            .filter(|id| !id.trim().is_empty())
            .or_else(|| id_from_url(&url))?;

        let title = first_text(item, &self.title).unwrap_or_default();
        if title.is_empty() {
            return None;
        }

        let mut record = Record::new(id, title, url);
        record.price = self.price.as_ref().and_then(|s| first_text(item, s));
        record.condition = self.condition.as_ref().and_then(|s| first_text(item, s));
        record.shipping = self.shipping.as_ref().and_then(|s| first_text(item, s));
        if let Some(image) = &self.image {
            record.images = item
                .select(image)
                .filter_map(|img| {
                    img.value()
                        .attr("src")
                        .or_else(|| img.value().attr("data-src"))
                })
                .map(|src| resolve_url(base_url, src))
                .collect();
        }
        for (name, selector) in &self.listing_fields {
            if let Some(value) = first_text(item, selector) {
                record.details.insert(name.clone(), value);
            }
        }
        Some(record)
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, page: &LoadedPage) -> Result<Vec<Record>, ExtractionError> {
        if page.html.trim().is_empty() {
            return Err(ExtractionError::new(format!("empty document at {}", page.url)));
        }

        let document = Html::parse_document(&page.html);
        let records = document
            .select(&self.item)
            .filter_map(|item| self.parse_item(&item, &page.url))
            .collect();
        Ok(records)
    }

    fn total_results(&self, page: &LoadedPage) -> Option<u64> {
        let selector = self.total_count.as_ref()?;
        let document = Html::parse_document(&page.html);
        let text = document
            .select(selector)
            .next()
            .map(|el| el.text().collect::<String>())?;

        let digits: String = self
            .count_pattern
            .find(&text)?
            .as_str()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    fn is_last_page(&self, page: &LoadedPage) -> bool {
        let Some(selector) = &self.end_of_results else {
            return false;
        };
        Html::parse_document(&page.html)
            .select(selector)
            .next()
            .is_some()
    }

    fn extract_details(
        &self,
        page: &LoadedPage,
        fields: &[String],
    ) -> Result<BTreeMap<String, String>, ExtractionError> {
        let document = Html::parse_document(&page.html);
        let root = document.root_element();

        let values: BTreeMap<String, String> = fields
            .iter()
            .filter_map(|field| {
                let selector = self.detail_fields.get(field)?;
                first_text(&root, selector).map(|value| (field.clone(), value))
            })
            .collect();

        if values.is_empty() {
            return Err(ExtractionError::new(format!(
                "none of {fields:?} found at {}",
                page.url
            )));
        }
        Ok(values)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector)
        .map_err(|e| ExtractionError::new(format!("invalid selector '{selector}': {e}")))
}

/// Whitespace-collapsed text of the first match, if non-empty.
fn first_text(scope: &ElementRef, selector: &Selector) -> Option<String> {
    let element = scope.select(selector).next()?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), |u| u.to_string())
}

/// Last non-empty path segment, used when items carry no id attribute.
fn id_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <h1 class="count">1,234 results for leica</h1>
          <ul>
            <li class="item" data-listing-id="101">
              <a class="link" href="/itm/101"><span class="title">Leica  M6
                body</span></a>
              <span class="price">$2,100.00</span>
              <img src="https://img.test/101.jpg">
              <span class="cond">Used</span>
              <span class="loc">Berlin</span>
            </li>
            <li class="item">
              <a class="link" href="https://www.example.com/itm/202"><span class="title">Summicron</span></a>
              <span class="ship">Free shipping</span>
            </li>
            <li class="item" data-listing-id="303">
              <span class="title">No link, skipped</span>
            </li>
          </ul>
        </body></html>
    "#;

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            item: "li.item".to_string(),
            id_attribute: "data-listing-id".to_string(),
            title: ".title".to_string(),
            price: Some(".price".to_string()),
            image: Some("img".to_string()),
            condition: Some(".cond".to_string()),
            shipping: Some(".ship".to_string()),
            link: "a.link".to_string(),
            listing_fields: BTreeMap::from([("location".to_string(), ".loc".to_string())]),
            total_count: Some("h1.count".to_string()),
            end_of_results: Some(".end-of-results".to_string()),
            detail_fields: BTreeMap::from([("seller".to_string(), ".seller-name".to_string())]),
        }
    }

    fn page(html: &str) -> LoadedPage {
        LoadedPage {
            url: "https://www.example.com/sch/i.html?_nkw=leica".to_string(),
            title: "leica | Example".to_string(),
            html: html.to_string(),
        }
    }

    #[test]
    fn test_extract_listing_items() {
        let extractor = SelectorExtractor::new(&config()).unwrap();
        let records = extractor.extract(&page(LISTING)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "101");
        assert_eq!(records[0].title, "Leica M6 body");
        assert_eq!(records[0].url, "https://www.example.com/itm/101");
        assert_eq!(records[0].price.as_deref(), Some("$2,100.00"));
        assert_eq!(records[0].images, vec!["https://img.test/101.jpg"]);
        assert_eq!(records[0].details.get("location").map(String::as_str), Some("Berlin"));

        assert_eq!(records[1].id, "202");
        assert_eq!(records[1].shipping.as_deref(), Some("Free shipping"));
        assert!(records[1].price.is_none());
    }

    #[test]
    fn test_total_results_parses_grouped_digits() {
        let extractor = SelectorExtractor::new(&config()).unwrap();
        assert_eq!(extractor.total_results(&page(LISTING)), Some(1234));
        assert_eq!(extractor.total_results(&page("<p>nothing</p>")), None);
    }

    #[test]
    fn test_end_of_results_marker() {
        let extractor = SelectorExtractor::new(&config()).unwrap();
        assert!(!extractor.is_last_page(&page(LISTING)));
        assert!(extractor.is_last_page(&page(r#"<div class="end-of-results"></div>"#)));
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let extractor = SelectorExtractor::new(&config()).unwrap();
        assert!(extractor.extract(&page("   ")).is_err());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut bad = config();
        bad.item = "li[".to_string();
        assert!(SelectorExtractor::new(&bad).is_err());
    }

    #[test]
    fn test_extract_details() {
        let extractor = SelectorExtractor::new(&config()).unwrap();
        let detail = page(r#"<div><span class="seller-name"> camstore </span></div>"#);

        let values = extractor
            .extract_details(&detail, &["seller".to_string()])
            .unwrap();
        assert_eq!(values.get("seller").map(String::as_str), Some("camstore"));

        assert!(extractor
            .extract_details(&detail, &["location".to_string()])
            .is_err());
    }
}
