//! Simulated DOM subtree for the decorative panel. The live tree is an
//! arena `Document` with stable, never-reused node ids, so tests can
//! verify that a patch left unaffected nodes untouched (same identity)
//! and that repeated patches of identical markup mutate nothing.
//!
//! `patch` parses the incoming HTML into a lightweight `Markup` tree and
//! reconciles it child-by-child against the live container: deep-equal
//! nodes are skipped entirely, same-tag elements are updated in place
//! (attribute sync + recursive descent), and only genuinely changed
//! positions are replaced, appended or removed.

use crate::extract::is_void_tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<NodeId>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
}

/// Parsed form of incoming HTML, detached from any arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Markup>,
    },
    Text(String),
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    mutations: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Node {
            data: NodeData::Element {
                tag: "div".to_string(),
                attrs: Vec::new(),
                children: Vec::new(),
            },
        };
        Document {
            nodes: vec![root],
            root: NodeId(0),
            mutations: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total structural/attribute mutations applied over the document's
    /// lifetime. Tests diff this counter around an operation.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Text(t) => Some(t),
            NodeData::Element { .. } => None,
        }
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id.0].data {
            NodeData::Element { children, .. } => children.clone(),
            NodeData::Text(_) => Vec::new(),
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            NodeData::Text(_) => None,
        }
    }

    /// Sets an attribute; counts a mutation only when the value changes.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            if let Some(entry) = attrs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                if entry.1 != value {
                    entry.1 = value.to_string();
                    self.mutations += 1;
                }
            } else {
                attrs.push((name.to_string(), value.to_string()));
                self.mutations += 1;
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            let before = attrs.len();
            attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            if attrs.len() != before {
                self.mutations += 1;
            }
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) {
        if let NodeData::Text(t) = &mut self.nodes[id.0].data {
            if t != value {
                *t = value.to_string();
                self.mutations += 1;
            }
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node { data });
        NodeId(self.nodes.len() - 1)
    }

    /// Detached text node; attaching it later is the counted mutation.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_element(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.alloc(NodeData::Element {
            tag: tag.to_string(),
            attrs,
            children: Vec::new(),
        })
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let NodeData::Element { children, .. } = &mut self.nodes[parent.0].data {
            children.push(child);
        }
    }

    /// Swap a parent's child list wholesale; one counted mutation when
    /// the list actually changes.
    pub fn replace_child_list(&mut self, parent: NodeId, new_children: Vec<NodeId>) {
        if let NodeData::Element { children, .. } = &mut self.nodes[parent.0].data {
            if *children != new_children {
                *children = new_children;
                self.mutations += 1;
            }
        }
    }

    fn build(&mut self, markup: &Markup) -> NodeId {
        match markup {
            Markup::Text(t) => self.alloc(NodeData::Text(t.clone())),
            Markup::Element {
                tag,
                attrs,
                children,
            } => {
                let child_ids: Vec<NodeId> = children.iter().map(|c| self.build(c)).collect();
                self.alloc(NodeData::Element {
                    tag: tag.clone(),
                    attrs: attrs.clone(),
                    children: child_ids,
                })
            }
        }
    }

    fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        if let NodeData::Element { children: c, .. } = &mut self.nodes[parent.0].data {
            *c = children;
        }
    }

    /// True when the live node already matches the markup exactly; such
    /// nodes are left completely untouched by `patch`.
    fn deep_equal(&self, id: NodeId, markup: &Markup) -> bool {
        match (&self.nodes[id.0].data, markup) {
            (NodeData::Text(a), Markup::Text(b)) => a == b,
            (
                NodeData::Element {
                    tag,
                    attrs,
                    children,
                },
                Markup::Element {
                    tag: mtag,
                    attrs: mattrs,
                    children: mchildren,
                },
            ) => {
                tag.eq_ignore_ascii_case(mtag)
                    && attrs == mattrs
                    && children.len() == mchildren.len()
                    && children
                        .iter()
                        .zip(mchildren.iter())
                        .all(|(c, m)| self.deep_equal(*c, m))
            }
            _ => false,
        }
    }

    /// Reconcile `container`'s children to the given HTML. Returns the
    /// number of mutations this patch performed; zero means the markup
    /// already matched the live tree.
    pub fn patch(&mut self, container: NodeId, html: &str) -> u64 {
        let markup = parse_fragment(html);
        let before = self.mutations;
        self.reconcile_children(container, &markup);
        self.mutations - before
    }

    fn reconcile_children(&mut self, parent: NodeId, new: &[Markup]) {
        let old = self.children(parent);
        let mut next: Vec<NodeId> = Vec::with_capacity(new.len());

        for (i, markup) in new.iter().enumerate() {
            match old.get(i) {
                Some(&existing) if self.deep_equal(existing, markup) => {
                    next.push(existing);
                }
                Some(&existing) => {
                    if let Some(updated) = self.try_update_in_place(existing, markup) {
                        next.push(updated);
                    } else {
                        let replacement = self.build(markup);
                        self.mutations += 1;
                        next.push(replacement);
                    }
                }
                None => {
                    let appended = self.build(markup);
                    self.mutations += 1;
                    next.push(appended);
                }
            }
        }

        let removed = old.len().saturating_sub(new.len()) as u64;
        self.mutations += removed;
        self.set_children(parent, next);
    }

    /// Update a node in place when its kind allows it (same-tag element
    /// or text node), preserving its identity. Returns None when only a
    /// full replacement is possible.
    fn try_update_in_place(&mut self, id: NodeId, markup: &Markup) -> Option<NodeId> {
        match (&self.nodes[id.0].data, markup) {
            (NodeData::Text(_), Markup::Text(t)) => {
                let value = t.clone();
                self.set_text(id, &value);
                Some(id)
            }
            (NodeData::Element { tag, .. }, Markup::Element { tag: mtag, .. })
                if tag.eq_ignore_ascii_case(mtag) =>
            {
                if let Markup::Element {
                    attrs, children, ..
                } = markup
                {
                    self.sync_attrs(id, attrs);
                    self.reconcile_children(id, children);
                }
                Some(id)
            }
            _ => None,
        }
    }

    fn sync_attrs(&mut self, id: NodeId, new_attrs: &[(String, String)]) {
        let current: Vec<(String, String)> = match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs.clone(),
            NodeData::Text(_) => return,
        };
        for (k, v) in new_attrs {
            self.set_attr(id, k, v);
        }
        for (k, _) in &current {
            if !new_attrs.iter().any(|(nk, _)| nk.eq_ignore_ascii_case(k)) {
                self.remove_attr(id, k);
            }
        }
    }

    /// Serialized markup of `id`'s children (the container's inner HTML).
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].data {
            NodeData::Text(t) => out.push_str(t),
            NodeData::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&v.replace('"', "&quot;"));
                    out.push('"');
                }
                out.push('>');
                if !is_void_tag(tag) {
                    for child in children {
                        self.write_node(*child, out);
                    }
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fragment parser
// ---------------------------------------------------------------------------

/// Forgiving HTML fragment parser. Unclosed elements close at end of
/// input, comments are dropped, `<style>`/`<script>` bodies are kept as
/// raw text, entities are passed through undecoded.
pub fn parse_fragment(html: &str) -> Vec<Markup> {
    let mut parser = FragmentParser {
        html,
        pos: 0,
        stack: Vec::new(),
        top: Vec::new(),
    };
    parser.run();
    parser.finish()
}

struct OpenElement {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Markup>,
}

struct FragmentParser<'a> {
    html: &'a str,
    pos: usize,
    stack: Vec<OpenElement>,
    top: Vec<Markup>,
}

impl<'a> FragmentParser<'a> {
    fn run(&mut self) {
        while self.pos < self.html.len() {
            let rest = &self.html[self.pos..];
            if let Some(stripped) = rest.strip_prefix("<!--") {
                self.pos += 4 + stripped.find("-->").map(|i| i + 3).unwrap_or(stripped.len());
                continue;
            }
            if rest.starts_with('<') {
                if !self.consume_tag() {
                    // Dangling partial tag: treat the rest as text.
                    let tail = self.html[self.pos..].to_string();
                    self.push_text(tail);
                    self.pos = self.html.len();
                }
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                let text = rest[..end].to_string();
                self.pos += end;
                self.push_text(text);
            }
        }
    }

    fn consume_tag(&mut self) -> bool {
        let rest = &self.html[self.pos..];
        let gt = match crate::extract::find_tag_end(rest) {
            Some(off) => off,
            None => return false,
        };
        let inner = &rest[1..gt];
        let advance = gt + 1;

        if let Some(close) = inner.strip_prefix('/') {
            let name: String = tag_ident(close);
            self.pos += advance;
            self.close_until(&name);
            return true;
        }
        if inner.starts_with('!') || inner.starts_with('?') {
            self.pos += advance;
            return true;
        }

        let inner = inner.trim_start();
        let name: String = tag_ident(inner);
        if name.is_empty() {
            // '<' as plain text
            self.push_text("<".to_string());
            self.pos += 1;
            return true;
        }
        let self_closing = inner.trim_end().ends_with('/');
        let attrs = parse_attrs(&inner[name.len()..]);
        self.pos += advance;

        let lower = name.to_ascii_lowercase();
        if lower == "style" || lower == "script" {
            let (body, end) = self.rawtext_body(&lower);
            self.push_node(Markup::Element {
                tag: lower,
                attrs,
                children: if body.is_empty() {
                    Vec::new()
                } else {
                    vec![Markup::Text(body)]
                },
            });
            self.pos = end;
        } else if is_void_tag(&lower) || self_closing {
            self.push_node(Markup::Element {
                tag: lower,
                attrs,
                children: Vec::new(),
            });
        } else {
            self.stack.push(OpenElement {
                tag: lower,
                attrs,
                children: Vec::new(),
            });
        }
        true
    }

    /// Body text and end position (past the close tag) of a rawtext
    /// element whose content starts at `self.pos`.
    fn rawtext_body(&self, name: &str) -> (String, usize) {
        let from = self.pos;
        let haystack = self.html[from..].to_ascii_lowercase();
        let needle = format!("</{}", name);
        match haystack.find(&needle) {
            Some(rel) => {
                let body = self.html[from..from + rel].to_string();
                let after = from + rel + needle.len();
                let end = self.html[after..]
                    .find('>')
                    .map(|g| after + g + 1)
                    .unwrap_or(self.html.len());
                (body, end)
            }
            None => (self.html[from..].to_string(), self.html.len()),
        }
    }

    fn close_until(&mut self, name: &str) {
        let matched = self
            .stack
            .iter()
            .rposition(|e| e.tag.eq_ignore_ascii_case(name));
        if let Some(pos) = matched {
            // Auto-close anything the close tag implicitly terminates.
            while self.stack.len() > pos {
                let open = match self.stack.pop() {
                    Some(e) => e,
                    None => break,
                };
                self.push_node(Markup::Element {
                    tag: open.tag,
                    attrs: open.attrs,
                    children: open.children,
                });
            }
        }
        // Stray close tags are dropped.
    }

    fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.push_node(Markup::Text(text));
    }

    fn push_node(&mut self, node: Markup) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.top.push(node),
        }
    }

    fn finish(mut self) -> Vec<Markup> {
        while let Some(open) = self.stack.pop() {
            self.push_node(Markup::Element {
                tag: open.tag,
                attrs: open.attrs,
                children: open.children,
            });
        }
        self.top
    }
}

fn tag_ident(s: &str) -> String {
    s.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

fn parse_attrs(mut rest: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() || rest == "/" {
            break;
        }
        let name: String = rest
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '=' && *c != '/')
            .collect();
        if name.is_empty() {
            let width = rest.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            rest = &rest[width..];
            continue;
        }
        rest = rest[name.len()..].trim_start();
        let value;
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(q) = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'') {
                let body = &after_eq[1..];
                let end = body.find(q).unwrap_or(body.len());
                value = body[..end].to_string();
                rest = &body[(end + 1).min(body.len())..];
            } else {
                let end = after_eq
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(after_eq.len());
                value = after_eq[..end].to_string();
                rest = &after_eq[end..];
            }
        } else {
            // Bare boolean attribute.
            value = String::new();
        }
        attrs.push((name.to_ascii_lowercase(), value));
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(html: &str) -> (Document, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        doc.patch(root, html);
        (doc, root)
    }

    #[test]
    fn test_parse_simple_fragment() {
        let nodes = parse_fragment("<div class=\"a\"><p>hi</p></div>");
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Markup::Element { tag, attrs, children } => {
                assert_eq!(tag, "div");
                assert_eq!(attrs[0], ("class".to_string(), "a".to_string()));
                assert_eq!(children.len(), 1);
            }
            _ => panic!("expected element"),
        }
    }

    #[test]
    fn test_parse_void_and_boolean_attrs() {
        let nodes = parse_fragment("<img src='x.png' hidden>");
        match &nodes[0] {
            Markup::Element { tag, attrs, children } => {
                assert_eq!(tag, "img");
                assert_eq!(attrs[0], ("src".to_string(), "x.png".to_string()));
                assert_eq!(attrs[1], ("hidden".to_string(), String::new()));
                assert!(children.is_empty());
            }
            _ => panic!("expected element"),
        }
    }

    #[test]
    fn test_parse_unclosed_element_autocloses() {
        let nodes = parse_fragment("<div><p>hi");
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Markup::Element { tag, children, .. } => {
                assert_eq!(tag, "div");
                assert_eq!(children.len(), 1);
            }
            _ => panic!("expected element"),
        }
    }

    #[test]
    fn test_parse_style_rawtext() {
        let nodes = parse_fragment("<style>.a > b {}</style>");
        match &nodes[0] {
            Markup::Element { tag, children, .. } => {
                assert_eq!(tag, "style");
                assert_eq!(children[0], Markup::Text(".a > b {}".to_string()));
            }
            _ => panic!("expected element"),
        }
    }

    #[test]
    fn test_parse_comment_dropped() {
        let nodes = parse_fragment("<!-- x --><p>a</p>");
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_patch_builds_tree_and_serializes_back() {
        let (doc, root) = doc_with("<div class=\"a\"><p>hi</p><img src=\"x\"></div>");
        assert_eq!(
            doc.inner_html(root),
            "<div class=\"a\"><p>hi</p><img src=\"x\"></div>"
        );
    }

    #[test]
    fn test_patch_idempotent_zero_mutations() {
        let html = "<div><p>hi</p><ul><li>a</li><li>b</li></ul></div>";
        let (mut doc, root) = doc_with(html);
        let delta = doc.patch(root, html);
        assert_eq!(delta, 0);
    }

    #[test]
    fn test_patch_preserves_untouched_sibling_identity() {
        let (mut doc, root) = doc_with("<div id=\"stable\"><input></div><p>old</p>");
        let stable_before = doc.children(root)[0];
        let input_before = doc.children(stable_before)[0];

        let delta = doc.patch(root, "<div id=\"stable\"><input></div><p>new</p>");
        assert!(delta > 0);

        let stable_after = doc.children(root)[0];
        assert_eq!(stable_before, stable_after, "unaffected node was replaced");
        assert_eq!(doc.children(stable_after)[0], input_before);

        let p = doc.children(root)[1];
        let text = doc.children(p)[0];
        assert_eq!(doc.text(text), Some("new"));
    }

    #[test]
    fn test_patch_text_update_keeps_element_identity() {
        let (mut doc, root) = doc_with("<p>one</p>");
        let p_before = doc.children(root)[0];
        doc.patch(root, "<p>two</p>");
        assert_eq!(doc.children(root)[0], p_before);
    }

    #[test]
    fn test_patch_removes_trailing_nodes() {
        let (mut doc, root) = doc_with("<p>a</p><p>b</p><p>c</p>");
        let delta = doc.patch(root, "<p>a</p>");
        assert_eq!(doc.children(root).len(), 1);
        assert_eq!(delta, 2);
    }

    #[test]
    fn test_patch_tag_change_replaces_node() {
        let (mut doc, root) = doc_with("<p>a</p>");
        let before = doc.children(root)[0];
        doc.patch(root, "<h2>a</h2>");
        let after = doc.children(root)[0];
        assert_ne!(before, after);
        assert_eq!(doc.tag(after), Some("h2"));
    }

    #[test]
    fn test_patch_attr_sync_adds_updates_removes() {
        let (mut doc, root) = doc_with("<div class=\"a\" id=\"x\">t</div>");
        doc.patch(root, "<div class=\"b\" data-k=\"1\">t</div>");
        let div = doc.children(root)[0];
        assert_eq!(doc.attr(div, "class"), Some("b"));
        assert_eq!(doc.attr(div, "data-k"), Some("1"));
        assert_eq!(doc.attr(div, "id"), None);
    }

    #[test]
    fn test_set_attr_noop_counts_no_mutation() {
        let (mut doc, root) = doc_with("<div class=\"a\">t</div>");
        let div = doc.children(root)[0];
        let before = doc.mutations();
        doc.set_attr(div, "class", "a");
        assert_eq!(doc.mutations(), before);
    }

    #[test]
    fn test_growing_stream_patches_accumulate() {
        let (mut doc, root) = doc_with("<style>.a{}</style>");
        doc.patch(root, "<style>.a{}</style><div><p>Hi</p></div>");
        assert_eq!(doc.children(root).len(), 2);
        // Style element untouched by the second patch.
        let style = doc.children(root)[0];
        assert_eq!(doc.tag(style), Some("style"));
    }
}
