//! Audible catalog client
//!
//! Searches and resolves bibliographic detail across a prioritized list of
//! regional catalog hosts. Per-host failures are skipped; a total miss is an
//! empty result, never an error. Response parsing is kept in pure functions
//! so it can be tested without the network.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Regional hosts tried in priority order
pub const LOCALES: [&str; 10] = [
    "com", "co.uk", "ca", "fr", "de", "it", "es", "co.jp", "com.au", "com.br",
];

const RESPONSE_GROUPS: &str =
    "category_ladders,contributors,media,product_desc,product_attrs,product_extended_attrs,rating,series";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Search results are capped at this size
pub const MAX_SEARCH_RESULTS: usize = 5;

/// Contributor name fragments that mark translators, filtered out of the
/// author display string
const TRANSLATOR_KEYWORDS: [&str; 13] = [
    "traducteur",
    "traductrice",
    "translator",
    "traductor",
    "traductora",
    "übersetzer",
    "übersetzerin",
    "traduttore",
    "traduttrice",
    "翻訳者",
    "번역가",
    "переводчик",
    "переводчица",
];

/// One search candidate
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub asin: String,
    pub title: String,
    pub author: String,
    pub narrator: Option<String>,
    pub series: Option<String>,
    pub locale: String,
}

/// Full bibliographic detail for one catalog record. Immutable once fetched;
/// empty strings mean "not present in the catalog".
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BookMetadata {
    pub asin: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub authors: Vec<String>,
    pub narrator: String,
    pub narrators: Vec<String>,
    pub series: String,
    pub series_part: String,
    pub description: String,
    pub runtime_length_min: String,
    pub rating: String,
    pub release_date: String,
    /// Normalized YYYY-MM-DD component of the release date
    pub release_time: String,
    pub language: String,
    pub format_type: String,
    pub publisher_name: String,
    pub explicit: bool,
    pub cover_url: String,
    pub genres: Vec<String>,
    pub copyright: String,
    pub isbn: String,
}

// Wire format of the catalog's product records

#[derive(Debug, Default, Deserialize)]
struct ProductPage {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Default, Deserialize)]
struct Product {
    #[serde(default)]
    asin: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<Person>,
    #[serde(default)]
    narrators: Vec<Person>,
    #[serde(default)]
    series: Vec<SeriesRef>,
    #[serde(default)]
    publisher_summary: Option<String>,
    #[serde(default)]
    merchandising_summary: Option<String>,
    #[serde(default)]
    product_desc: Option<String>,
    #[serde(default)]
    runtime_length_min: Option<u64>,
    #[serde(default)]
    rating: Option<Rating>,
    #[serde(default)]
    publication_datetime: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    format_type: Option<String>,
    #[serde(default)]
    publisher_name: Option<String>,
    #[serde(default)]
    is_adult_product: Option<bool>,
    #[serde(default)]
    product_images: Option<HashMap<String, String>>,
    #[serde(default)]
    category_ladders: Vec<CategoryLadder>,
    #[serde(default)]
    product_extended_attrs: Option<ExtendedAttrs>,
}

#[derive(Debug, Default, Deserialize)]
struct Person {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SeriesRef {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sequence: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Rating {
    #[serde(default)]
    overall_distribution: Option<OverallDistribution>,
}

#[derive(Debug, Default, Deserialize)]
struct OverallDistribution {
    #[serde(default)]
    display_average_rating: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CategoryLadder {
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    ladder: Vec<CategoryNode>,
}

#[derive(Debug, Default, Deserialize)]
struct CategoryNode {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtendedAttrs {
    #[serde(default)]
    copyright: Option<String>,
    #[serde(default)]
    isbn: Option<String>,
    #[serde(default)]
    isbn13: Option<String>,
    #[serde(default)]
    isbn10: Option<String>,
}

/// Catalog API client
pub struct CatalogClient {
    http: reqwest::Client,
}

impl CatalogClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Catalog(e.to_string()))?;

        Ok(Self { http })
    }

    /// Free-text search across the prioritized locale list.
    ///
    /// Stops at the first locale that returns any product; candidates are
    /// deduplicated by asin and capped at [`MAX_SEARCH_RESULTS`]. A miss on
    /// every locale is an empty list, not an error.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        for locale in LOCALES {
            let page = match self.query_products(locale, query, MAX_SEARCH_RESULTS).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(locale, error = %e, "Catalog search failed for locale");
                    continue;
                }
            };

            let hits = collect_hits(&page.products, locale);
            if !hits.is_empty() {
                tracing::info!(locale, query, results = hits.len(), "Catalog search resolved");
                return Ok(hits);
            }
        }

        tracing::info!(query, "Catalog search returned no results on any locale");
        Ok(Vec::new())
    }

    /// Resolve full bibliographic detail for a catalog identifier.
    ///
    /// Tries the preferred locale first, then the remaining prioritized list,
    /// until a product with a matching asin is found. `Ok(None)` if no locale
    /// yields a match.
    pub async fn fetch_details(
        &self,
        asin: &str,
        locale: Option<&str>,
    ) -> Result<Option<BookMetadata>> {
        let mut order: Vec<&str> = Vec::with_capacity(LOCALES.len() + 1);
        if let Some(preferred) = locale {
            order.push(preferred);
        }
        order.extend(LOCALES.iter().filter(|l| Some(**l) != locale));

        for current in order {
            let page = match self.query_products(current, asin, 1).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(locale = current, error = %e, "Catalog detail lookup failed for locale");
                    continue;
                }
            };

            if let Some(product) = page.products.iter().find(|p| p.asin == asin) {
                tracing::info!(asin, locale = current, "Catalog detail resolved");
                return Ok(Some(metadata_from_product(product)));
            }
        }

        tracing::info!(asin, "No catalog record found on any locale");
        Ok(None)
    }

    /// Fetch raw bytes from a catalog-hosted URL (cover images)
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Catalog(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Catalog(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn query_products(
        &self,
        locale: &str,
        keywords: &str,
        num_results: usize,
    ) -> Result<ProductPage> {
        let url = format!("https://api.audible.{}/1.0/catalog/products", locale);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("keywords", keywords),
                ("response_groups", RESPONSE_GROUPS),
                ("image_sizes", "500,1000"),
                ("num_results", &num_results.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Catalog(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::Catalog(e.to_string()))?;

        response
            .json::<ProductPage>()
            .await
            .map_err(|e| Error::Catalog(e.to_string()))
    }
}

/// Map products to deduplicated search hits, capped at the result limit
fn collect_hits(products: &[Product], locale: &str) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();

    for product in products {
        if product.asin.is_empty() || hits.iter().any(|h| h.asin == product.asin) {
            continue;
        }

        let narrators = person_names(&product.narrators);
        let series = product.series.first().and_then(|s| {
            let title = s.title.clone()?;
            Some(match sequence_string(s) {
                Some(seq) => format!("{} #{}", title, seq),
                None => title,
            })
        });

        hits.push(SearchHit {
            asin: product.asin.clone(),
            title: product
                .title
                .clone()
                .unwrap_or_else(|| "Unknown Title".to_string()),
            author: author_display(&product.authors),
            narrator: (!narrators.is_empty()).then(|| narrators.join(", ")),
            series,
            locale: locale.to_string(),
        });

        if hits.len() >= MAX_SEARCH_RESULTS {
            break;
        }
    }

    hits
}

/// Build a [`BookMetadata`] from a raw product record
fn metadata_from_product(product: &Product) -> BookMetadata {
    let authors = person_names(&product.authors);
    let narrators = person_names(&product.narrators);

    let (series, series_part) = product
        .series
        .first()
        .map(|s| {
            (
                s.title.clone().unwrap_or_default(),
                sequence_string(s).unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    let description = product
        .publisher_summary
        .as_deref()
        .or(product.merchandising_summary.as_deref())
        .or(product.product_desc.as_deref())
        .map(clean_html)
        .unwrap_or_default();

    let rating = product
        .rating
        .as_ref()
        .and_then(|r| r.overall_distribution.as_ref())
        .and_then(|d| d.display_average_rating.as_ref())
        .map(value_to_string)
        .unwrap_or_default();

    let release_date = product.publication_datetime.clone().unwrap_or_default();
    let release_time = if release_date.len() >= 10 {
        release_date[..10].to_string()
    } else {
        String::new()
    };

    // Prefer the 1000px cover, fall back to 500px
    let cover_url = product
        .product_images
        .as_ref()
        .and_then(|images| images.get("1000").or_else(|| images.get("500")))
        .cloned()
        .unwrap_or_default();

    let genres = product
        .category_ladders
        .iter()
        .filter(|ladder| ladder.root.as_deref() == Some("Genres"))
        .flat_map(|ladder| ladder.ladder.iter())
        .filter_map(|node| node.name.clone())
        .collect();

    let (copyright, isbn) = product
        .product_extended_attrs
        .as_ref()
        .map(|attrs| {
            let isbn = attrs
                .isbn
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| attrs.isbn13.clone().filter(|s| !s.is_empty()))
                .or_else(|| attrs.isbn10.clone())
                .unwrap_or_default();
            (attrs.copyright.clone().unwrap_or_default(), isbn)
        })
        .unwrap_or_default();

    let explicit = product.is_adult_product.unwrap_or(false);

    BookMetadata {
        asin: product.asin.clone(),
        title: product.title.clone().unwrap_or_default(),
        subtitle: product.subtitle.clone().unwrap_or_default(),
        author: author_display(&product.authors),
        authors,
        narrator: narrators.join(", "),
        narrators,
        series,
        series_part,
        description,
        runtime_length_min: product
            .runtime_length_min
            .map(|m| m.to_string())
            .unwrap_or_default(),
        rating,
        release_date,
        release_time,
        language: product.language.clone().unwrap_or_default(),
        format_type: product.format_type.clone().unwrap_or_default(),
        publisher_name: product.publisher_name.clone().unwrap_or_default(),
        explicit,
        cover_url,
        genres,
        copyright,
        isbn,
    }
}

fn person_names(people: &[Person]) -> Vec<String> {
    people
        .iter()
        .filter_map(|p| p.name.as_deref())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Joined author display string with translator-role contributors filtered
/// out. If filtering removes everyone, the unfiltered list is used instead.
fn author_display(authors: &[Person]) -> String {
    let names = person_names(authors);
    if names.is_empty() {
        return "Unknown Author".to_string();
    }

    let filtered: Vec<&String> = names
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            !TRANSLATOR_KEYWORDS
                .iter()
                .any(|keyword| lower.contains(keyword))
        })
        .collect();

    if filtered.is_empty() {
        names.join(", ")
    } else {
        filtered
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn sequence_string(series: &SeriesRef) -> Option<String> {
    let seq = series.sequence.as_ref().map(value_to_string)?;
    (!seq.is_empty()).then_some(seq)
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Strip HTML tags and entities, normalizing paragraphs to blank-line breaks
pub fn clean_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut replaced = text.to_string();
    for (entity, replacement) in [
        ("&nbsp;", " "),
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&ldquo;", "\""),
        ("&rdquo;", "\""),
        ("&lsquo;", "'"),
        ("&rsquo;", "'"),
        ("&mdash;", "\u{2014}"),
        ("&ndash;", "\u{2013}"),
        ("&hellip;", "..."),
    ] {
        replaced = replaced.replace(entity, replacement);
    }

    // Strip tags, turning paragraph/line-break tags into newlines first
    for br in ["<br>", "<br/>", "<br />", "</p>"] {
        replaced = replaced.replace(br, "\n");
    }
    let mut stripped = String::with_capacity(replaced.len());
    let mut in_tag = false;
    for c in replaced.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
