//! Fixed HTML shell wrapped around a communication's rich-text body.

/// The body is admin-authored HTML and is embedded as-is; only the
/// recipient name is text-escaped.
pub fn render_html(body_html: &str, header_image_url: &str, recipient_name: &str) -> String {
    let name = escape_text(recipient_name);
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <body style=\"margin:0;padding:0;background:#f4f4f4;\">\n\
         <div style=\"max-width:600px;margin:0 auto;background:#ffffff;font-family:Arial,sans-serif;\">\n\
           <img src=\"{header_image_url}\" alt=\"\" style=\"width:100%;display:block;\"/>\n\
           <div style=\"padding:24px;\">\n\
             <p>Bonjour {name},</p>\n\
             {body_html}\n\
           </div>\n\
           <div style=\"padding:16px 24px;font-size:12px;color:#888888;\">\n\
             <p>Vous recevez ce message en tant que membre. Vos pr\u{e9}f\u{e9}rences de\n\
             communication sont modifiables depuis votre espace adh\u{e9}rent.</p>\n\
           </div>\n\
         </div>\n\
         </body>\n\
         </html>"
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_body_and_header() {
        let html = render_html("<p>Contenu</p>", "https://cdn.example.org/a.png", "Jean");
        assert!(html.contains("<p>Contenu</p>"));
        assert!(html.contains("https://cdn.example.org/a.png"));
        assert!(html.contains("Bonjour Jean,"));
    }

    #[test]
    fn escapes_recipient_name() {
        let html = render_html("<p>x</p>", "img", "<script>");
        assert!(html.contains("Bonjour &lt;script&gt;,"));
    }
}
