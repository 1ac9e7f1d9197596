//! Retained element tree mirrored by the WebView frontend.
//!
//! Only what the page view needs: a tag, one class, an id, absolute-position
//! styling and a handful of attributes. Serialized as-is over IPC.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Div,
    A,
    Img,
    Span,
}

/// Inline style, lengths in CSS pixels.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub letter_spacing: Option<f32>,
}

impl Style {
    /// Absolute box at `(x, y)` sized `w` x `h`.
    pub fn boxed(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            left: Some(x),
            top: Some(y),
            width: Some(w),
            height: Some(h),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub tag: Tag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub style: Style,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub draggable: bool,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            class: None,
            id: None,
            style: Style::default(),
            text: None,
            href: None,
            src: None,
            draggable: true,
            children: Vec::new(),
        }
    }

    /// `div` with a class, the most common node on a page.
    pub fn div(class: &str) -> Self {
        Self::new(Tag::Div).with_class(class)
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class.as_deref() == Some(class)
    }

    pub fn append_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn replace_children(&mut self, children: Vec<Node>) {
        self.children = children;
    }

    /// First direct child carrying `class`.
    pub fn child(&self, class: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.has_class(class))
    }

    /// Detach every direct child carrying `class`. Returns how many were removed.
    pub fn remove_children(&mut self, class: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| !c.has_class(class));
        before - self.children.len()
    }

    /// Replace the direct child carrying `class` with `node` in one step,
    /// keeping its position. Without such a child, `node` goes in at
    /// `fallback_index` (clamped to the child count).
    pub fn swap_child(&mut self, class: &str, node: Node, fallback_index: usize) {
        match self.children.iter().position(|c| c.has_class(class)) {
            Some(index) => self.children[index] = node,
            None => {
                let index = fallback_index.min(self.children.len());
                self.children.insert(index, node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_child_keeps_position() {
        let mut root = Node::div("page");
        root.append_child(Node::div("anchor"));
        root.append_child(Node::div("text"));
        root.append_child(Node::div("links"));

        root.swap_child("text", Node::div("text").with_text("new"), 99);
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[1].text.as_deref(), Some("new"));

        root.swap_child("image", Node::div("image"), 1);
        let classes: Vec<_> = root.children.iter().filter_map(|c| c.class.as_deref()).collect();
        assert_eq!(classes, ["anchor", "image", "text", "links"]);
    }

    #[test]
    fn test_remove_children() {
        let mut root = Node::div("page");
        root.append_child(Node::div("anchor"));
        root.append_child(Node::div("links"));

        assert_eq!(root.remove_children("links"), 1);
        assert_eq!(root.remove_children("links"), 0);
        assert!(root.child("anchor").is_some());
    }

    #[test]
    fn test_style_serializes_camel_case_and_skips_unset() {
        let mut style = Style::boxed(1.0, 2.0, 3.0, 4.0);
        style.letter_spacing = Some(0.5);

        let json = serde_json::to_value(&style).unwrap();
        assert_eq!(json["letterSpacing"], 0.5);
        assert_eq!(json["left"], 1.0);
        assert!(json.get("fontSize").is_none());
    }
}
