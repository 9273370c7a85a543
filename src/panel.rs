//! Panel controller: the explicit state object that owns the decorative
//! panel's buffers, live tree and caches for one widget instance. Wires
//! the extractor, patcher and sanitizer together with the monotonic
//! apply guard from the concurrency rules: identical or stale committed
//! content is never re-applied.

use crate::dom::{Document, NodeId};
use crate::extract::HtmlBuffer;
use crate::sanitize::{sanitize, Theme};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    /// No generation yet, or the last one produced nothing.
    Idle,
    /// A generation is in flight; chunks are being committed as they
    /// complete.
    Streaming,
    /// The last generation finished and its content is on screen.
    Complete,
}

pub struct PanelController {
    buffer: HtmlBuffer,
    doc: Document,
    container: NodeId,
    theme: Theme,
    state: PanelState,
    last_applied: String,
}

impl PanelController {
    pub fn new(theme: Theme) -> Self {
        let doc = Document::new();
        let container = doc.root();
        PanelController {
            buffer: HtmlBuffer::new(),
            doc,
            container,
            theme,
            state: PanelState::Idle,
            last_applied: String::new(),
        }
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    /// True once any markup has been committed to the live tree.
    pub fn has_content(&self) -> bool {
        !self.last_applied.is_empty()
    }

    pub fn committed(&self) -> &str {
        self.buffer.committed()
    }

    /// Serialized current panel markup (post-sanitize).
    pub fn rendered_html(&self) -> String {
        self.doc.inner_html(self.container)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    /// A new generation begins: buffers reset, previous content stays on
    /// screen until the first commit replaces it.
    pub fn begin_generation(&mut self) {
        self.buffer.reset();
        self.state = PanelState::Streaming;
    }

    /// Feed one `html_chunk` payload. Patches and sanitizes only when the
    /// committed prefix actually grew past what is already applied.
    pub fn push_chunk(&mut self, content: &str) -> u64 {
        if !self.buffer.push(content) {
            return 0;
        }
        let committed = self.buffer.committed().to_string();
        self.apply(&committed)
    }

    /// Terminal `html_end`. `full_html` of `None` means the generation
    /// produced nothing useful; existing content is left untouched.
    pub fn finish_generation(&mut self, full_html: Option<&str>) -> u64 {
        let mutations = match full_html {
            Some(full) => self.apply(full),
            None => 0,
        };
        self.state = if self.has_content() {
            PanelState::Complete
        } else {
            PanelState::Idle
        };
        mutations
    }

    /// Clear everything back to the initial mount state.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.doc = Document::new();
        self.container = self.doc.root();
        self.last_applied.clear();
        self.state = PanelState::Idle;
    }

    fn apply(&mut self, html: &str) -> u64 {
        if html == self.last_applied {
            return 0;
        }
        let patched = self.doc.patch(self.container, html);
        let sanitized = sanitize(&mut self.doc, self.container, &self.theme);
        self.last_applied = html.to_string();
        debug!(patched, sanitized, "panel apply");
        patched + sanitized
    }
}

impl Default for PanelController {
    fn default() -> Self {
        PanelController::new(Theme::light())
    }
}
