//! HTML fragments for the read-only pages. All dynamic text goes through
//! [`escape`].

use std::fmt::Write;

use crate::store::{CategorySummary, Page, Statistics, StoredRecord};

/// Body preview length on list pages, in characters.
pub const PREVIEW_CHARS: usize = 200;

const STYLE: &str = "body{font-family:sans-serif;margin:0;background:#f5f5f5}\
nav{background:#333;padding:0 20px}nav a{color:#fff;display:inline-block;padding:14px 16px;text-decoration:none}\
main{max-width:1100px;margin:0 auto;padding:20px}\
.card{background:#fff;border-radius:5px;padding:16px 20px;margin-bottom:16px;box-shadow:0 1px 4px rgba(0,0,0,.1)}\
.meta{color:#666;font-size:.9em}.badge{background:#e0e0e0;border-radius:10px;padding:2px 8px;font-size:.8em;margin-right:4px}\
.body{white-space:pre-wrap}.pagination{text-align:center}.pagination a{padding:8px 14px}";

/// Escape text for use in HTML element content and quoted attributes.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// First `max_chars` characters of `body`, with an ellipsis when cut.
pub fn preview(body: &str, max_chars: usize) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub fn layout(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title} - Mailstash</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <nav><a href=\"/\">Overview</a><a href=\"/emails\">Emails</a>\
         <a href=\"/categories\">Categories</a><a href=\"/stats\">Statistics</a></nav>\n\
         <main>\n<h1>{title}</h1>\n{content}\n</main>\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn badges(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| {
            format!(
                "<a class=\"badge\" href=\"/categories/{}\">{}</a>",
                urlencoding::encode(c),
                escape(c)
            )
        })
        .collect()
}

/// One record as a list entry with a body preview.
pub fn record_item(record: &StoredRecord) -> String {
    format!(
        "<div class=\"card\"><a href=\"/emails/{id}\"><strong>{subject}</strong></a>\
         <div class=\"meta\">{sender} &middot; {date}</div>\
         <div>{badges}</div><p class=\"body\">{preview}</p></div>\n",
        id = urlencoding::encode(&record.id),
        subject = escape(display_subject(&record.subject)),
        sender = escape(&record.sender),
        date = escape(&record.date),
        badges = badges(&record.categories),
        preview = escape(&preview(&record.body, PREVIEW_CHARS)),
    )
}

pub fn record_list(records: &[StoredRecord]) -> String {
    if records.is_empty() {
        return "<p>No messages.</p>".to_string();
    }
    records.iter().map(record_item).collect()
}

/// Full record view.
pub fn record_detail(record: &StoredRecord) -> String {
    let processed = if record.is_processed { "yes" } else { "no" };
    format!(
        "<div class=\"card\"><div class=\"meta\">From: {sender}<br>Date: {date}<br>\
         Type: {content_type}<br>Processed: {processed}<br>Mailbox id: {external_id}</div>\
         <div>{badges}</div><pre class=\"body\">{body}</pre></div>",
        sender = escape(&record.sender),
        date = escape(&record.date),
        content_type = escape(&record.content_type),
        external_id = escape(&record.external_id),
        badges = badges(&record.categories),
        body = escape(&record.body),
    )
}

pub fn display_subject(subject: &str) -> &str {
    if subject.trim().is_empty() {
        "(no subject)"
    } else {
        subject
    }
}

pub fn search_form(query: Option<&str>) -> String {
    format!(
        "<form class=\"card\" method=\"get\" action=\"/emails\">\
         <input type=\"text\" name=\"query\" value=\"{}\" placeholder=\"Subject or sender\">\
         <button type=\"submit\">Search</button></form>",
        escape(query.unwrap_or_default())
    )
}

/// Previous/next links under `base` that keep the current search.
pub fn pagination<T>(base: &str, page: &Page<T>, query: Option<&str>) -> String {
    let link = |n: u32| {
        let mut href = format!("{base}?page={n}");
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            let _ = write!(href, "&query={}", urlencoding::encode(q));
        }
        escape(&href)
    };

    let mut out = String::from("<div class=\"pagination\">");
    if page.page > 1 {
        let _ = write!(out, "<a href=\"{}\">&laquo; Previous</a>", link(page.page - 1));
    }
    let _ = write!(
        out,
        "<span>Page {} of {} ({} messages)</span>",
        page.page,
        page.total_pages.max(1),
        page.total
    );
    if page.page < page.total_pages {
        let _ = write!(out, "<a href=\"{}\">Next &raquo;</a>", link(page.page + 1));
    }
    out.push_str("</div>");
    out
}

pub fn category_table(categories: &[CategorySummary]) -> String {
    let mut out = String::from("<table class=\"card\"><tr><th>Category</th><th>Description</th><th>Messages</th></tr>");
    for c in categories {
        let _ = write!(
            out,
            "<tr><td><a href=\"/categories/{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
            urlencoding::encode(&c.name),
            escape(&c.name),
            escape(c.description.as_deref().unwrap_or_default()),
            c.count
        );
    }
    out.push_str("</table>");
    out
}

pub fn statistics(stats: &Statistics) -> String {
    let mut out = format!(
        "<div class=\"card\"><p>Total: {}</p><p>Processed: {}</p><p>Unprocessed: {}</p></div>",
        stats.total, stats.processed, stats.unprocessed
    );

    out.push_str("<div class=\"card\"><h2>By category</h2><ul>");
    for c in &stats.per_category {
        let _ = write!(out, "<li>{}: {}</li>", escape(&c.name), c.count);
    }
    out.push_str("</ul></div><div class=\"card\"><h2>Top senders</h2><ul>");
    for s in &stats.top_senders {
        let _ = write!(out, "<li>{}: {}</li>", escape(&s.sender), s.count);
    }
    out.push_str("</ul></div><div class=\"card\"><h2>Recent days</h2><ul>");
    for d in &stats.recent_days {
        let _ = write!(out, "<li>{}: {}</li>", escape(&d.day), d.count);
    }
    out.push_str("</ul></div>");
    out
}
