use crate::error::{Result, ScanError};
use sift_core::{SiteConfig, Target};
use url::form_urlencoded::byte_serialize;
use url::Url;

/// Build the URL of listing page `page` (1-based) for `target`.
///
/// Queries are substituted into the site's search template; locators keep
/// their own query string with the paging parameters replaced.
pub fn build_page_url(site: &SiteConfig, target: &Target, page: u32, page_size: u32) -> Result<String> {
    match target {
        Target::Query(query) => {
            let encoded: String = byte_serialize(query.trim().as_bytes()).collect();
            let url = site
                .search_template
                .replace("{query}", &encoded)
                .replace("{page}", &page.to_string())
                .replace("{page_size}", &page_size.to_string());
            Url::parse(&url)
                .map_err(|e| ScanError::InvalidTarget(format!("search template produced {url}: {e}")))?;
            Ok(url)
        }
        Target::Locator(locator) => {
            let mut url = Url::parse(locator)
                .map_err(|e| ScanError::InvalidTarget(format!("{locator}: {e}")))?;

            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != site.page_param.as_str() && k != site.page_size_param.as_str())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair(&site.page_param, &page.to_string())
                .append_pair(&site.page_size_param, &page_size.to_string());
            Ok(url.to_string())
        }
    }
}
