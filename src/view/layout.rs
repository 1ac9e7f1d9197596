//! Letter-spacing correction for the text overlay.
//!
//! The overlay is set in whatever font the viewer has, not the document's
//! embedded one, so each line comes out wider or narrower than the page
//! raster beneath it. After the spans are laid out we measure them and
//! spread the difference over the gaps between characters.

use super::node::{Node, Style};

/// Measures laid-out text the way the frontend renders it.
pub trait TextMeasurer: Send + Sync {
    /// Natural width in CSS pixels of `text` styled with `style`, without
    /// letter spacing.
    fn measure(&self, text: &str, style: &Style) -> f32;
}

/// Fixed advance per character as a fraction of the font size.
#[derive(Debug, Clone, Copy)]
pub struct AverageAdvance {
    pub regular: f32,
    pub bold: f32,
}

impl Default for AverageAdvance {
    fn default() -> Self {
        Self {
            regular: 0.5,
            bold: 0.55,
        }
    }
}

impl TextMeasurer for AverageAdvance {
    fn measure(&self, text: &str, style: &Style) -> f32 {
        let ratio = match style.font_weight.as_deref() {
            Some("bold") => self.bold,
            _ => self.regular,
        };
        text.chars().count() as f32 * style.font_size.unwrap_or(16.0) * ratio
    }
}

/// Spacing that stretches `measured` to `target` over `text`'s character
/// gaps. `None` for strings under two characters.
pub fn letter_spacing(text: &str, target: f32, measured: f32) -> Option<f32> {
    let gaps = text.chars().count().checked_sub(1).filter(|&g| g > 0)?;
    Some((target - measured) / gaps as f32)
}

/// Width of a span once its letter spacing is applied.
pub fn rendered_width(span: &Node, measurer: &dyn TextMeasurer) -> f32 {
    let text = span.text.as_deref().unwrap_or_default();
    let natural = measurer.measure(text, &span.style);
    let gaps = text.chars().count().saturating_sub(1) as f32;
    natural + span.style.letter_spacing.unwrap_or(0.0) * gaps
}

/// Fit each span to its source width. `targets[i]` belongs to `spans[i]`.
///
/// All spans are measured before any is adjusted, matching a browser where
/// reading layout after each write would force a reflow per line.
pub fn fit_spans(spans: &mut [Node], targets: &[f32], measurer: &dyn TextMeasurer) {
    let measured: Vec<Option<f32>> = spans
        .iter()
        .map(|span| {
            let text = span.text.as_deref().unwrap_or_default();
            (text.chars().count() >= 2).then(|| measurer.measure(text, &span.style))
        })
        .collect();

    for ((span, &target), measured) in spans.iter_mut().zip(targets).zip(measured) {
        let Some(measured) = measured else {
            continue;
        };
        let text = span.text.as_deref().unwrap_or_default();
        span.style.letter_spacing = letter_spacing(text, target, measured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::node::Tag;

    fn span(text: &str, size: f32) -> Node {
        let mut node = Node::new(Tag::Span).with_text(text);
        node.style.font_size = Some(size);
        node
    }

    #[test]
    fn test_fit_converges_to_source_width() {
        let measurer = AverageAdvance::default();
        let mut spans = vec![span("Hello, world", 12.0), span("ab", 10.0), span("wide line", 20.0)];
        let targets = [80.0, 3.0, 150.0];

        fit_spans(&mut spans, &targets, &measurer);

        for (span, target) in spans.iter().zip(targets) {
            assert!((rendered_width(span, &measurer) - target).abs() < 1e-3);
        }
    }

    #[test]
    fn test_short_lines_are_left_alone() {
        let measurer = AverageAdvance::default();
        let mut spans = vec![span("x", 12.0), span("", 12.0)];

        fit_spans(&mut spans, &[40.0, 40.0], &measurer);

        assert!(spans.iter().all(|s| s.style.letter_spacing.is_none()));
        assert_eq!(letter_spacing("x", 40.0, 6.0), None);
    }

    #[test]
    fn test_spacing_counts_chars_not_bytes() {
        // 3 chars, 2 gaps, 6+ bytes
        assert_eq!(letter_spacing("éàü", 10.0, 4.0), Some(3.0));
    }

    #[test]
    fn test_bold_measures_wider() {
        let measurer = AverageAdvance::default();
        let regular = Style { font_size: Some(10.0), ..Style::default() };
        let bold = Style { font_weight: Some("bold".to_string()), ..regular.clone() };

        assert_eq!(measurer.measure("abcd", &regular), 20.0);
        assert!(measurer.measure("abcd", &bold) > 20.0);
    }
}
