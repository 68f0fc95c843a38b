//! Companion files written next to a filed audiobook
//!
//! Library consumers (shelf managers, media servers) read plain-text and OPF
//! descriptors from the book directory. Every writer here is best-effort: a
//! failed sidecar is logged and skipped, never fails the tagging job.

use crate::services::catalog::BookMetadata;
use std::path::Path;

/// Write all sidecars into the book directory. The OPF takes its stem from
/// the directory name, which matches the artifact's stem by construction.
pub fn write_all(book_dir: &Path, metadata: &BookMetadata, cover_path: Option<&Path>) {
    if !metadata.description.is_empty() {
        write_text(&book_dir.join("desc.txt"), &metadata.description);
    }
    if !metadata.narrator.is_empty() {
        write_text(&book_dir.join("reader.txt"), &metadata.narrator);
    }

    let stem = book_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "metadata".to_string());
    write_text(&book_dir.join(format!("{}.opf", stem)), &build_opf(metadata));

    if let Some(cover) = cover_path {
        if let Err(e) = std::fs::copy(cover, book_dir.join("cover.jpg")) {
            tracing::warn!(path = %cover.display(), error = %e, "Could not copy cover sidecar");
        }
    }
}

fn write_text(path: &Path, content: &str) {
    if let Err(e) = std::fs::write(path, content) {
        tracing::warn!(path = %path.display(), error = %e, "Could not write sidecar");
    }
}

/// Render an OPF 2.0 metadata package for the book
pub fn build_opf(metadata: &BookMetadata) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<package version=\"2.0\" xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"BookId\">\n");
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n");

    push_tag(&mut out, "dc:title", &metadata.title);

    let authors: &[String] = if metadata.authors.is_empty() {
        std::slice::from_ref(&metadata.author)
    } else {
        &metadata.authors
    };
    for author in authors {
        if !author.is_empty() {
            out.push_str(&format!(
                "    <dc:creator opf:role=\"aut\">{}</dc:creator>\n",
                xml_escape(author)
            ));
        }
    }
    for narrator in &metadata.narrators {
        if !narrator.is_empty() {
            out.push_str(&format!(
                "    <dc:contributor opf:role=\"nrt\">{}</dc:contributor>\n",
                xml_escape(narrator)
            ));
        }
    }

    push_tag(&mut out, "dc:description", &metadata.description);
    push_tag(&mut out, "dc:publisher", &metadata.publisher_name);
    push_tag(&mut out, "dc:language", &metadata.language);
    push_tag(&mut out, "dc:date", &metadata.release_time);
    push_tag(&mut out, "dc:rights", &metadata.copyright);

    if !metadata.asin.is_empty() {
        out.push_str(&format!(
            "    <dc:identifier opf:scheme=\"ASIN\" id=\"BookId\">{}</dc:identifier>\n",
            xml_escape(&metadata.asin)
        ));
    }
    if !metadata.isbn.is_empty() {
        out.push_str(&format!(
            "    <dc:identifier opf:scheme=\"ISBN\">{}</dc:identifier>\n",
            xml_escape(&metadata.isbn)
        ));
    }

    for genre in &metadata.genres {
        push_tag(&mut out, "dc:subject", genre);
    }

    if !metadata.series.is_empty() {
        out.push_str(&format!(
            "    <meta name=\"calibre:series\" content=\"{}\"/>\n",
            xml_escape(&metadata.series)
        ));
        if !metadata.series_part.is_empty() {
            out.push_str(&format!(
                "    <meta name=\"calibre:series_index\" content=\"{}\"/>\n",
                xml_escape(&metadata.series_part)
            ));
        }
    }

    // Extension properties read by shelf managers
    if !metadata.runtime_length_min.is_empty() {
        out.push_str(&format!(
            "    <meta property=\"duration\">{}</meta>\n",
            xml_escape(&metadata.runtime_length_min)
        ));
    }
    if !metadata.rating.is_empty() {
        out.push_str(&format!(
            "    <meta property=\"rating\">{}</meta>\n",
            xml_escape(&metadata.rating)
        ));
    }

    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str("    <item id=\"cover\" href=\"cover.jpg\" media-type=\"image/jpeg\"/>\n");
    out.push_str("  </manifest>\n");
    out.push_str("  <spine>\n");
    out.push_str("    <itemref idref=\"cover\"/>\n");
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn push_tag(out: &mut String, tag: &str, value: &str) {
    if !value.is_empty() {
        out.push_str(&format!("    <{}>{}</{}>\n", tag, xml_escape(value), tag));
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
