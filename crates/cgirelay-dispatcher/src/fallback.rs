use cgirelay_common::Document;

/// Page returned when a request cannot be handed to any worker.
///
/// Names the likely causes and links back to `url` with the original query
/// string so the user can start a new session.
pub fn no_handler_page(url: &str, query_string: &str) -> Document {
    let restart = if query_string.is_empty() {
        url.to_string()
    } else {
        format!("{}?{}", url, query_string)
    };
    let restart = escape_html(&restart);

    Document::html(format!(
        "<html>\n\
         <head><title>No handler</title></head>\n\
         <body>\n\
         <h1>No handler for this request</h1>\n\
         <p>The server that was handling your session is no longer available. \
         Possible causes:</p>\n\
         <ul>\n\
         <li>your session timed out</li>\n\
         <li>you used the back button and resubmitted an old page</li>\n\
         <li>the server was restarted</li>\n\
         </ul>\n\
         <p><a href=\"{restart}\">Start again at {restart}</a></p>\n\
         </body>\n\
         </html>\n"
    ))
}

/// Escapes `s` for use in HTML text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
