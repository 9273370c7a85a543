//! Post-patch content passes. Generated markup cannot be trusted to
//! respect the surrounding design system, so after every patch the panel
//! runs four passes over the container, in order: strip disallowed style
//! constructs, force readable text color from the composited effective
//! background, isolate emoji into their own spans, and flag images for
//! the lightbox. All passes are idempotent; a second run over unchanged
//! content performs zero mutations.

use crate::color::{composite_over, parse_color, relative_luminance, Rgba};
use crate::dom::{Document, NodeData, NodeId};

/// Forced text colors for light and dark effective backgrounds.
pub const TEXT_ON_LIGHT: &str = "#111827";
pub const TEXT_ON_DARK: &str = "#f9fafb";

/// Effective backgrounds at or above this relative luminance count as
/// light.
const LUMINANCE_THRESHOLD: f64 = 0.45;

/// Panel theme. The base background is what a fully transparent element
/// chain composites against.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub base_background: Rgba,
}

impl Theme {
    pub fn light() -> Self {
        Theme {
            base_background: Rgba::WHITE,
        }
    }

    pub fn dark() -> Self {
        Theme {
            base_background: Rgba::opaque(17, 24, 39),
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Theme::light()
    }
}

/// Run all four passes under `container`. Returns the mutation count.
pub fn sanitize(doc: &mut Document, container: NodeId, theme: &Theme) -> u64 {
    let before = doc.mutations();
    strip_disallowed_styles(doc, container);
    assign_contrast(doc, container, theme.base_background);
    isolate_emoji(doc, container);
    bind_images(doc, container);
    doc.mutations() - before
}

// ---------------------------------------------------------------------------
// Pass 1: disallowed style stripping
// ---------------------------------------------------------------------------

fn strip_disallowed_styles(doc: &mut Document, id: NodeId) {
    if let Some(style) = doc.attr(id, "style").map(str::to_string) {
        let mut decls = parse_decls(&style);
        let before = decls.len();
        decls.retain(|(prop, value)| !is_disallowed(prop, value));
        if decls.len() != before {
            if decls.is_empty() {
                doc.remove_attr(id, "style");
            } else {
                doc.set_attr(id, "style", &serialize_decls(&decls));
            }
        }
    }
    for child in doc.children(id) {
        strip_disallowed_styles(doc, child);
    }
}

fn is_disallowed(prop: &str, value: &str) -> bool {
    let value = value.to_ascii_lowercase();
    match prop {
        "backdrop-filter" => true,
        "filter" => value.contains("blur("),
        "background" | "background-image" => value.contains("gradient("),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Pass 2: contrast assignment
// ---------------------------------------------------------------------------

/// Top-down walk carrying the composited effective background, so each
/// element sees its ancestors' colors already blended against the theme
/// base. The forced high-priority text color lands on any element that
/// declares its own background, and on any element whose declared text
/// color sits on the same side of the luminance threshold as the
/// effective background — generated markup must not be able to render
/// text invisible. Elements with neither inherit the theme (or an
/// already-corrected ancestor) and are left alone. Unparsable color
/// values are skipped, never fatal.
fn assign_contrast(doc: &mut Document, id: NodeId, inherited: Rgba) {
    let mut effective = inherited;

    if let Some(style) = doc.attr(id, "style").map(str::to_string) {
        let mut decls = parse_decls(&style);
        let mut force = false;

        if let Some(own) = own_background(&decls).and_then(parse_color) {
            effective = composite_over(&own, &inherited);
            force = true;
        }
        let bg_light = relative_luminance(&effective) >= LUMINANCE_THRESHOLD;
        if !force {
            if let Some(text) = own_text_color(&decls) {
                let lum = relative_luminance(&composite_over(&text, &effective));
                force = (lum >= LUMINANCE_THRESHOLD) == bg_light;
            }
        }
        if force {
            let text = if bg_light { TEXT_ON_LIGHT } else { TEXT_ON_DARK };
            set_prop(&mut decls, "color", &format!("{} !important", text));
            doc.set_attr(id, "style", &serialize_decls(&decls));
        }
    }

    for child in doc.children(id) {
        if doc.tag(child).is_some() {
            assign_contrast(doc, child, effective);
        }
    }
}

fn own_background<'a>(decls: &'a [(String, String)]) -> Option<&'a str> {
    get_prop(decls, "background-color").or_else(|| {
        // A plain-color `background` shorthand counts too.
        get_prop(decls, "background").filter(|v| parse_color(v).is_some())
    })
}

/// The element's declared text color; a trailing `!important` from an
/// earlier pass is tolerated.
fn own_text_color(decls: &[(String, String)]) -> Option<Rgba> {
    let value = get_prop(decls, "color")?;
    parse_color(value.trim_end_matches("!important").trim())
}

// ---------------------------------------------------------------------------
// Pass 3: emoji isolation
// ---------------------------------------------------------------------------

fn isolate_emoji(doc: &mut Document, id: NodeId) {
    if is_emoji_span(doc, id) {
        return;
    }
    let children = doc.children(id);
    let mut rebuilt: Vec<NodeId> = Vec::with_capacity(children.len());
    let mut changed = false;

    for child in children {
        match doc.data(child) {
            NodeData::Text(text) => {
                let segments = split_emoji_runs(text);
                if segments.len() == 1 && !segments[0].1 {
                    rebuilt.push(child);
                } else {
                    changed = true;
                    for (segment, is_emoji) in segments {
                        let node = doc.create_text(&segment);
                        if is_emoji {
                            let span = doc.create_element(
                                "span",
                                vec![("class".to_string(), "emoji".to_string())],
                            );
                            doc.append_child(span, node);
                            rebuilt.push(span);
                        } else {
                            rebuilt.push(node);
                        }
                    }
                }
            }
            NodeData::Element { .. } => {
                isolate_emoji(doc, child);
                rebuilt.push(child);
            }
        }
    }

    if changed {
        doc.replace_child_list(id, rebuilt);
    }
}

fn is_emoji_span(doc: &Document, id: NodeId) -> bool {
    doc.tag(id) == Some("span")
        && doc
            .attr(id, "class")
            .map(|c| c.split_whitespace().any(|cl| cl == "emoji"))
            .unwrap_or(false)
}

/// Split text into (segment, is_emoji_run) pieces. Joiners, variation
/// selectors and skin-tone modifiers extend a run but never start one.
fn split_emoji_runs(text: &str) -> Vec<(String, bool)> {
    let mut segments: Vec<(String, bool)> = Vec::new();
    for ch in text.chars() {
        let extends = is_emoji_extender(ch);
        let starts = is_emoji_base(ch);
        let in_run = segments.last().map(|(_, e)| *e).unwrap_or(false);
        let emoji = starts || (extends && in_run);
        match segments.last_mut() {
            Some((seg, kind)) if *kind == emoji => seg.push(ch),
            _ => segments.push((ch.to_string(), emoji)),
        }
    }
    if segments.is_empty() {
        segments.push((String::new(), false));
    }
    segments
}

fn is_emoji_base(ch: char) -> bool {
    if ('\u{1F1E6}'..='\u{1F1FF}').contains(&ch) {
        return true;
    }
    let mut buf = [0u8; 4];
    emojis::get(ch.encode_utf8(&mut buf)).is_some()
}

fn is_emoji_extender(ch: char) -> bool {
    matches!(ch, '\u{FE0F}' | '\u{200D}') || ('\u{1F3FB}'..='\u{1F3FF}').contains(&ch)
}

// ---------------------------------------------------------------------------
// Pass 4: image interactivity binding
// ---------------------------------------------------------------------------

fn bind_images(doc: &mut Document, id: NodeId) {
    if doc.tag(id) == Some("img") && doc.attr(id, "data-lightbox") != Some("bound") {
        doc.set_attr(id, "data-lightbox", "bound");
        let style = doc.attr(id, "style").map(str::to_string).unwrap_or_default();
        let mut decls = parse_decls(&style);
        set_prop(&mut decls, "cursor", "zoom-in");
        doc.set_attr(id, "style", &serialize_decls(&decls));
    }
    for child in doc.children(id) {
        bind_images(doc, child);
    }
}

// ---------------------------------------------------------------------------
// Inline style declaration helpers
// ---------------------------------------------------------------------------

fn parse_decls(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if prop.is_empty() || value.is_empty() {
                None
            } else {
                Some((prop, value))
            }
        })
        .collect()
}

fn serialize_decls(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(p, v)| format!("{}: {}", p, v))
        .collect::<Vec<_>>()
        .join("; ")
}

fn get_prop<'a>(decls: &'a [(String, String)], name: &str) -> Option<&'a str> {
    decls
        .iter()
        .find(|(p, _)| p == name)
        .map(|(_, v)| v.as_str())
}

fn set_prop(decls: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = decls.iter_mut().find(|(p, _)| p == name) {
        entry.1 = value.to_string();
    } else {
        decls.push((name.to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitized(html: &str, theme: &Theme) -> (Document, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        doc.patch(root, html);
        sanitize(&mut doc, root, theme);
        (doc, root)
    }

    #[test]
    fn test_gradient_background_stripped() {
        let (doc, root) = sanitized(
            "<div style=\"background: linear-gradient(red, blue); padding: 4px\">x</div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let style = doc.attr(div, "style").unwrap_or("");
        assert!(!style.contains("gradient"));
        assert!(style.contains("padding: 4px"));
    }

    #[test]
    fn test_blur_and_backdrop_filter_stripped() {
        let (doc, root) = sanitized(
            "<div style=\"backdrop-filter: blur(4px)\"><p style=\"filter: blur(2px)\">x</p></div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        assert!(doc
            .attr(div, "style")
            .map_or(true, |s| !s.contains("backdrop-filter")));
        let p = doc.children(div)[0];
        assert!(doc.attr(p, "style").map_or(true, |s| !s.contains("blur")));
    }

    #[test]
    fn test_non_blur_filter_kept() {
        let (doc, root) = sanitized(
            "<div style=\"filter: brightness(1.1)\">x</div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        assert!(doc.attr(div, "style").unwrap_or("").contains("brightness"));
    }

    #[test]
    fn test_contrast_on_white_background() {
        let (doc, root) = sanitized(
            "<div style=\"background-color: rgb(255,255,255)\">text</div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let style = doc.attr(div, "style").unwrap_or("");
        assert!(style.contains(&format!("color: {} !important", TEXT_ON_LIGHT)));
    }

    #[test]
    fn test_contrast_on_near_black_background() {
        let (doc, root) = sanitized(
            "<div style=\"background-color: rgb(17,24,39)\">text</div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let style = doc.attr(div, "style").unwrap_or("");
        assert!(style.contains(&format!("color: {} !important", TEXT_ON_DARK)));
    }

    #[test]
    fn test_contrast_uses_composited_overlay() {
        // 50% white over a black page base composites to mid gray, which
        // sits below the light threshold: the overlay must NOT be treated
        // as raw white.
        let (doc, root) = sanitized(
            "<div style=\"background-color: rgba(255,255,255,0.5)\">text</div>",
            &Theme::dark(),
        );
        let div = doc.children(root)[0];
        let style = doc.attr(div, "style").unwrap_or("");
        assert!(style.contains(&format!("color: {} !important", TEXT_ON_DARK)));
    }

    #[test]
    fn test_contrast_nested_inherits_parent_background() {
        let (doc, root) = sanitized(
            "<div style=\"background-color: #111827\"><p style=\"background-color: rgba(255,255,255,0.9)\">x</p></div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let p = doc.children(div)[0];
        // 90% white over near-black is still clearly light.
        assert!(doc
            .attr(p, "style")
            .unwrap_or("")
            .contains(&format!("color: {} !important", TEXT_ON_LIGHT)));
    }

    #[test]
    fn test_unparsable_color_skipped() {
        let (doc, root) = sanitized(
            "<div style=\"background-color: var(--x)\">text</div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        assert!(!doc.attr(div, "style").unwrap_or("").contains("!important"));
    }

    #[test]
    fn test_no_background_no_override() {
        let (doc, root) = sanitized("<p>plain</p>", &Theme::light());
        let p = doc.children(root)[0];
        assert_eq!(doc.attr(p, "style"), None);
    }

    #[test]
    fn test_child_color_matching_dark_parent_background_overridden() {
        // Black text inside a black card would be invisible even though
        // the child declares no background of its own.
        let (doc, root) = sanitized(
            "<div style=\"background-color: #000\"><p style=\"color: #000\">x</p></div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let p = doc.children(div)[0];
        assert!(doc
            .attr(p, "style")
            .unwrap_or("")
            .contains(&format!("color: {} !important", TEXT_ON_DARK)));
    }

    #[test]
    fn test_light_declared_color_on_light_theme_overridden() {
        let (doc, root) = sanitized("<p style=\"color: #fff\">x</p>", &Theme::light());
        let p = doc.children(root)[0];
        assert!(doc
            .attr(p, "style")
            .unwrap_or("")
            .contains(&format!("color: {} !important", TEXT_ON_LIGHT)));
    }

    #[test]
    fn test_readable_declared_color_kept() {
        let (doc, root) = sanitized(
            "<div style=\"background-color: #000\"><p style=\"color: #fff\">x</p></div>",
            &Theme::light(),
        );
        let div = doc.children(root)[0];
        let p = doc.children(div)[0];
        assert_eq!(doc.attr(p, "style"), Some("color: #fff"));
    }

    #[test]
    fn test_emoji_wrapped_in_span() {
        let (doc, root) = sanitized("<p>Привет 👋 мир</p>", &Theme::light());
        let p = doc.children(root)[0];
        let kids = doc.children(p);
        assert_eq!(kids.len(), 3);
        assert_eq!(doc.text(kids[0]), Some("Привет "));
        assert_eq!(doc.tag(kids[1]), Some("span"));
        assert_eq!(doc.attr(kids[1], "class"), Some("emoji"));
        assert_eq!(doc.text(doc.children(kids[1])[0]), Some("👋"));
        assert_eq!(doc.text(kids[2]), Some(" мир"));
    }

    #[test]
    fn test_emoji_zwj_sequence_kept_in_one_span() {
        let (doc, root) = sanitized("<p>a👩‍💻b</p>", &Theme::light());
        let p = doc.children(root)[0];
        let kids = doc.children(p);
        assert_eq!(kids.len(), 3);
        assert_eq!(doc.text(doc.children(kids[1])[0]), Some("👩\u{200D}💻"));
    }

    #[test]
    fn test_plain_text_not_restructured() {
        let (doc, root) = sanitized("<p>no pictographs here</p>", &Theme::light());
        let p = doc.children(root)[0];
        assert_eq!(doc.children(p).len(), 1);
    }

    #[test]
    fn test_image_binding_sets_flag_and_cursor() {
        let (doc, root) = sanitized("<img src=\"a.png\">", &Theme::light());
        let img = doc.children(root)[0];
        assert_eq!(doc.attr(img, "data-lightbox"), Some("bound"));
        assert!(doc.attr(img, "style").unwrap_or("").contains("zoom-in"));
    }

    #[test]
    fn test_sanitize_idempotent() {
        let html = "<div style=\"background-color: #111827; background-image: linear-gradient(red, blue)\"><p style=\"color: #000\">Hi 🎉</p><img src=\"a.png\"></div>";
        let mut doc = Document::new();
        let root = doc.root();
        doc.patch(root, html);
        let first = sanitize(&mut doc, root, &Theme::light());
        assert!(first > 0);
        let second = sanitize(&mut doc, root, &Theme::light());
        assert_eq!(second, 0, "second pass mutated the tree");
    }

    #[test]
    fn test_split_emoji_runs_groups_adjacent() {
        let segs = split_emoji_runs("ok 🎉🎉 done");
        assert_eq!(
            segs,
            vec![
                ("ok ".to_string(), false),
                ("🎉🎉".to_string(), true),
                (" done".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_variation_selector_does_not_start_run() {
        let segs = split_emoji_runs("x\u{FE0F}y");
        assert_eq!(segs.len(), 1);
        assert!(!segs[0].1);
    }
}
