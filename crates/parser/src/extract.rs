use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use lol_html::html_content::{Element, EndTag};
use lol_html::{doc_text, element, HandlerResult, HtmlRewriter, Settings};
use url::Url;

use trawl_core::{is_valid_crawl_url, CrawlError, ExtractedPage};

/// Tokenizer state shared between the element and text handlers.
#[derive(Default)]
struct ExtractState {
    title: Option<String>,
    title_buf: String,
    in_title: bool,
    in_script: bool,
    in_style: bool,
    skip_depth: u32,
    description: Option<String>,
    language: Option<String>,
    content: String,
    links: Vec<String>,
    metadata: HashMap<String, String>,
}

impl ExtractState {
    fn capture_text(&mut self, chunk: &str) {
        if self.in_title && self.title.is_none() {
            self.title_buf.push_str(chunk);
        }
        if !self.in_script && !self.in_style && self.skip_depth == 0 {
            self.content.push_str(chunk);
        }
    }

    fn finish_title(&mut self) {
        self.in_title = false;
        if self.title.is_some() {
            return;
        }
        let title = decode(&self.title_buf);
        if !title.is_empty() {
            self.title = Some(title);
        }
        self.title_buf.clear();
    }

    fn set_meta(&mut self, key: String, content: String) {
        match key.as_str() {
            "description" => {
                if self.description.is_none() {
                    self.description = Some(content);
                }
            }
            "language" | "content-language" => {
                if self.language.is_none() {
                    self.language = Some(content);
                }
            }
            "og:locale" => {
                if self.language.is_none() {
                    self.language = Some(content);
                }
            }
            "og:title" | "og:description" | "og:image" | "og:url" | "og:type" | "robots"
            | "author" => {
                self.metadata.insert(key, content);
            }
            _ => {}
        }
    }
}

fn decode(raw: &str) -> String {
    html_escape::decode_html_entities(raw).trim().to_string()
}

/// One streaming pass over an HTML document: title, description, language,
/// Open-Graph/canonical metadata, absolute outbound links, and the visible
/// text outside of nav/header/footer/aside/script/style.
pub fn extract_page(html: &str, base: &Url) -> Result<ExtractedPage, CrawlError> {
    let state = Rc::new(RefCell::new(ExtractState::default()));

    // Increments skip_depth on entry and registers the matching decrement
    // on the end tag; used for nav, header, footer, and aside.
    let skip_handler = |state: &Rc<RefCell<ExtractState>>| {
        let state = Rc::clone(state);
        move |el: &mut Element| -> HandlerResult {
            state.borrow_mut().skip_depth += 1;
            let state = Rc::clone(&state);
            match el.end_tag_handlers() {
                Some(handlers) => handlers.push(Box::new(move |_: &mut EndTag| {
                    let mut s = state.borrow_mut();
                    s.skip_depth = s.skip_depth.saturating_sub(1);
                    Ok(())
                })),
                None => {
                    let mut s = state.borrow_mut();
                    s.skip_depth = s.skip_depth.saturating_sub(1);
                }
            }
            Ok(())
        }
    };

    let html_handler = {
        let state = Rc::clone(&state);
        move |el: &mut Element| -> HandlerResult {
            if let Some(lang) = el.get_attribute("lang") {
                let lang = decode(&lang);
                let mut s = state.borrow_mut();
                if s.language.is_none() && !lang.is_empty() {
                    s.language = Some(lang);
                }
            }
            Ok(())
        }
    };

    let title_handler = {
        let state = Rc::clone(&state);
        move |el: &mut Element| -> HandlerResult {
            {
                let mut s = state.borrow_mut();
                s.in_title = true;
                s.title_buf.clear();
            }
            let state = Rc::clone(&state);
            match el.end_tag_handlers() {
                Some(handlers) => handlers.push(Box::new(move |_: &mut EndTag| {
                    state.borrow_mut().finish_title();
                    Ok(())
                })),
                None => state.borrow_mut().finish_title(),
            }
            Ok(())
        }
    };

    let raw_text_handler = |state: &Rc<RefCell<ExtractState>>, style: bool| {
        let state = Rc::clone(state);
        move |el: &mut Element| -> HandlerResult {
            {
                let mut s = state.borrow_mut();
                if style {
                    s.in_style = true;
                } else {
                    s.in_script = true;
                }
            }
            let state = Rc::clone(&state);
            match el.end_tag_handlers() {
                Some(handlers) => handlers.push(Box::new(move |_: &mut EndTag| {
                    let mut s = state.borrow_mut();
                    if style {
                        s.in_style = false;
                    } else {
                        s.in_script = false;
                    }
                    Ok(())
                })),
                None => {
                    let mut s = state.borrow_mut();
                    if style {
                        s.in_style = false;
                    } else {
                        s.in_script = false;
                    }
                }
            }
            Ok(())
        }
    };

    let meta_handler = {
        let state = Rc::clone(&state);
        move |el: &mut Element| -> HandlerResult {
            let key = el.get_attribute("name").or_else(|| el.get_attribute("property"));
            let (Some(key), Some(content)) = (key, el.get_attribute("content")) else {
                return Ok(());
            };
            let key = key.trim().to_ascii_lowercase();
            let content = decode(&content);
            if !content.is_empty() {
                state.borrow_mut().set_meta(key, content);
            }
            Ok(())
        }
    };

    let link_handler = {
        let state = Rc::clone(&state);
        move |el: &mut Element| -> HandlerResult {
            let (Some(rel), Some(href)) = (el.get_attribute("rel"), el.get_attribute("href"))
            else {
                return Ok(());
            };
            let href = href.trim();
            if rel.trim().eq_ignore_ascii_case("canonical") && !href.is_empty() {
                state
                    .borrow_mut()
                    .metadata
                    .insert("canonical".to_string(), href.to_string());
            }
            Ok(())
        }
    };

    let anchor_handler = {
        let state = Rc::clone(&state);
        let base = base.clone();
        move |el: &mut Element| -> HandlerResult {
            let Some(href) = el.get_attribute("href") else {
                return Ok(());
            };
            let href = href.trim();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
            {
                return Ok(());
            }
            if let Ok(resolved) = base.join(href) {
                let resolved = String::from(resolved);
                if is_valid_crawl_url(&resolved) {
                    state.borrow_mut().links.push(resolved);
                }
            }
            Ok(())
        }
    };

    let text_handler = {
        let state = Rc::clone(&state);
        move |chunk: &mut lol_html::html_content::TextChunk| -> HandlerResult {
            state.borrow_mut().capture_text(chunk.as_str());
            Ok(())
        }
    };

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("html", html_handler),
                element!("title", title_handler),
                element!("script", raw_text_handler(&state, false)),
                element!("style", raw_text_handler(&state, true)),
                element!("nav", skip_handler(&state)),
                element!("header", skip_handler(&state)),
                element!("footer", skip_handler(&state)),
                element!("aside", skip_handler(&state)),
                element!("meta", meta_handler),
                element!("link", link_handler),
                element!("a[href]", anchor_handler),
            ],
            document_content_handlers: vec![doc_text!(text_handler)],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    rewriter
        .write(html.as_bytes())
        .map_err(|e| CrawlError::Parse(e.to_string()))?;
    rewriter
        .end()
        .map_err(|e| CrawlError::Parse(e.to_string()))?;

    let mut s = state.borrow_mut();
    // a <title> left unclosed at end of input
    if s.in_title {
        s.finish_title();
    }
    let content = decode(&s.content)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    Ok(ExtractedPage {
        title: s.title.take(),
        description: s.description.take(),
        language: s.language.take(),
        content,
        links: std::mem::take(&mut s.links),
        metadata: std::mem::take(&mut s.metadata),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Test Page</title>
  <meta name="description" content="A test page for extraction">
  <meta property="og:image" content="https://example.com/img/cover.png">
  <meta property="og:title" content="Test Page OG">
  <link rel="canonical" href="https://example.com/test">
  <style>.hidden { display: none; }</style>
</head>
<body>
  <nav>Navigation links</nav>
  <h1>Hello World</h1>
  <p>This is the main content of the page.</p>
  <a href="https://example.com/about">About</a>
  <a href="/contact">Contact</a>
  <a href="https://other.org/page">Elsewhere</a>
  <script>var tracking = "script body";</script>
  <footer>Footer content</footer>
</body>
</html>"#;

    fn extract_fixture() -> ExtractedPage {
        let base = Url::parse("https://example.com/test").unwrap();
        extract_page(FIXTURE, &base).unwrap()
    }

    #[test]
    fn extracts_title_description_and_language() {
        let page = extract_fixture();
        assert_eq!(page.title.as_deref(), Some("Test Page"));
        assert_eq!(page.description.as_deref(), Some("A test page for extraction"));
        assert_eq!(page.language.as_deref(), Some("en"));
    }

    #[test]
    fn collects_metadata_keys() {
        let page = extract_fixture();
        assert_eq!(
            page.metadata.get("canonical").map(String::as_str),
            Some("https://example.com/test")
        );
        assert_eq!(
            page.metadata.get("og:image").map(String::as_str),
            Some("https://example.com/img/cover.png")
        );
        assert_eq!(page.metadata.get("og:title").map(String::as_str), Some("Test Page OG"));
    }

    #[test]
    fn content_excludes_chrome_script_and_style() {
        let page = extract_fixture();
        assert!(page.content.contains("Hello World"));
        assert!(page.content.contains("main content"));
        assert!(!page.content.contains("Navigation links"));
        assert!(!page.content.contains("Footer content"));
        assert!(!page.content.contains("script body"));
        assert!(!page.content.contains("display: none"));
    }

    #[test]
    fn links_are_absolute_valid_and_in_source_order() {
        let page = extract_fixture();
        assert_eq!(
            page.links,
            vec![
                "https://example.com/about",
                "https://example.com/contact",
                "https://other.org/page",
            ]
        );
        for link in &page.links {
            assert!(is_valid_crawl_url(link));
        }
    }

    #[test]
    fn nested_skip_regions_resume_correctly() {
        let html = r#"<html><body>
<p>before</p>
<header>site head <nav>menu one menu two</nav> tagline</header>
<p>after</p>
</body></html>"#;
        let base = Url::parse("https://example.com/").unwrap();
        let page = extract_page(html, &base).unwrap();
        assert!(page.content.contains("before"));
        assert!(page.content.contains("after"));
        assert!(!page.content.contains("menu one"));
        assert!(!page.content.contains("tagline"));
    }

    #[test]
    fn whitespace_collapses_and_entities_decode() {
        let html = "<html><head><title>Caf&eacute;   &amp;   Bar</title></head>\
<body><p>one\n\n   two\tthree</p></body></html>";
        let base = Url::parse("https://example.com/").unwrap();
        let page = extract_page(html, &base).unwrap();
        assert_eq!(page.title.as_deref(), Some("Café & Bar"));
        assert!(page.content.contains("one two three"));
    }

    #[test]
    fn meta_language_fallbacks() {
        let base = Url::parse("https://example.com/").unwrap();

        let via_meta = extract_page(
            r#"<html><head><meta name="content-language" content="de"></head><body></body></html>"#,
            &base,
        )
        .unwrap();
        assert_eq!(via_meta.language.as_deref(), Some("de"));

        let via_locale = extract_page(
            r#"<html><head><meta property="og:locale" content="fr_FR"></head><body></body></html>"#,
            &base,
        )
        .unwrap();
        assert_eq!(via_locale.language.as_deref(), Some("fr_FR"));

        let attr_wins = extract_page(
            r#"<html lang="en"><head><meta property="og:locale" content="fr_FR"></head><body></body></html>"#,
            &base,
        )
        .unwrap();
        assert_eq!(attr_wins.language.as_deref(), Some("en"));
    }

    #[test]
    fn unusable_anchors_are_dropped() {
        let html = r##"<html><body>
<a href="javascript:void(0)">js</a>
<a href="mailto:a@b.c">mail</a>
<a href="#top">frag</a>
<a href="/file.zip">archive</a>
<a href="/page">page</a>
</body></html>"##;
        let base = Url::parse("https://example.com/").unwrap();
        let page = extract_page(html, &base).unwrap();
        assert_eq!(page.links, vec!["https://example.com/page"]);
    }

    #[test]
    fn first_nonempty_title_wins() {
        let html = "<html><head><title>  </title><title>Real</title></head><body></body></html>";
        let base = Url::parse("https://example.com/").unwrap();
        let page = extract_page(html, &base).unwrap();
        assert_eq!(page.title.as_deref(), Some("Real"));
    }
}
