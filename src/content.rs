//! Rendering of a [`PatchSpec`] into a self-contained patch block.
//!
//! The block is a standalone script statement that appends a `<style>`
//! element to the document head. It starts with `;` so it cannot merge with
//! an unterminated statement in front of it, and it is wrapped in the
//! extension's markers so [`Markers::strip`] can take it out again.

use crate::image::css_url;
use crate::marker::Markers;
use crate::patch::PatchSpec;
use std::fmt;

/// Rendered patch block, markers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock(String);

impl PatchBlock {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure `PatchSpec -> PatchBlock` renderer bound to one marker pair.
#[derive(Debug, Clone, Default)]
pub struct ContentBuilder {
    markers: Markers,
    host_file_urls: bool,
}

impl ContentBuilder {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            host_file_urls: false,
        }
    }

    /// Serve local image paths through the host's file scheme instead of
    /// emitting them verbatim.
    pub fn with_host_file_urls(mut self, enabled: bool) -> Self {
        self.host_file_urls = enabled;
        self
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn build(&self, spec: &PatchSpec) -> PatchBlock {
        let image = if self.host_file_urls {
            css_url(spec.image())
        } else {
            spec.image().to_string()
        };
        let css = escape_template_literal(&render_css_with_image(spec, &image));
        PatchBlock(format!(
            "{start}\n;(function(){{const style=document.createElement('style');style.textContent=`{css}`;document.head.appendChild(style);}})();\n{end}",
            start = self.markers.start(),
            end = self.markers.end(),
        ))
    }
}

/// The `body::before` overlay rule for `spec`, image emitted verbatim.
pub fn render_css(spec: &PatchSpec) -> String {
    render_css_with_image(spec, &spec.image().as_str())
}

fn render_css_with_image(spec: &PatchSpec, image: &str) -> String {
    let layout = spec.size_mode().layout();
    let image = escape_css_string(image);

    format!(
        r#"
body::before{{
  content: "";
  top: 0;
  left: 0;
  width: 100%;
  height: 100%;
  position: absolute;
  background-size: {size};
  background-repeat: {repeat};
  background-position: {position};
  opacity:{opacity};
  background-image:url('{image}');
  z-index: 2;
  pointer-events: none;
  filter: blur({blur}px);
  mix-blend-mode: {blend};
}}
"#,
        size = layout.size,
        repeat = layout.repeat,
        position = layout.position,
        opacity = spec.effective_opacity(),
        blur = spec.blur(),
        blend = spec.blend_mode(),
    )
}

/// Escape for a single-quoted CSS string.
fn escape_css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' | '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Escape for a JS template literal. Comment openers/closers are broken up
/// so the rendered text can never contain a marker.
fn escape_template_literal(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
        .replace("/*", "/\\*")
        .replace("*/", "*\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{BlendMode, ImageReference, SizeMode};

    fn spec(image: &str, opacity: f64, blur: f64, mode: SizeMode) -> PatchSpec {
        PatchSpec::new(
            ImageReference::parse(image),
            opacity,
            blur,
            mode,
            BlendMode::new("multiply"),
        )
        .unwrap()
    }

    #[test]
    fn test_block_is_wrapped_in_markers() {
        let builder = ContentBuilder::new(Markers::new("id"));
        let block = builder.build(&spec("img.png", 0.5, 10.0, SizeMode::Cover));
        assert!(block.as_str().starts_with("/*ext-id-start*/"));
        assert!(block.as_str().ends_with("/*ext-id-end*/"));
        assert_eq!(builder.markers().count_blocks(block.as_str()), 1);
    }

    #[test]
    fn test_render_scenario_values() {
        let block = ContentBuilder::new(Markers::new("id"))
            .build(&spec("img.png", 0.5, 10.0, SizeMode::Cover));
        let text = block.as_str();
        assert!(text.contains("background-image:url('img.png');"));
        assert!(text.contains("opacity:0.5;"));
        assert!(text.contains("filter: blur(10px);"));
        assert!(text.contains("mix-blend-mode: multiply;"));
        assert!(text.contains("background-size: cover;"));
        assert!(text.contains("background-repeat: no-repeat;"));
        assert!(text.contains("background-position: center;"));
    }

    #[test]
    fn test_opacity_clamped_in_render() {
        let css = render_css(&spec("img.png", 0.95, 0.0, SizeMode::Cover));
        assert!(css.contains("opacity:0.8;"));
        assert!(!css.contains("0.95"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let s = spec("img.png", 0.3, 2.5, SizeMode::NoopTopRight);
        let builder = ContentBuilder::default();
        assert_eq!(builder.build(&s), builder.build(&s));
        assert!(render_css(&s).contains("background-position: right 30px;"));
        assert!(render_css(&s).contains("filter: blur(2.5px);"));
    }

    #[test]
    fn test_host_file_urls_for_local_images() {
        let builder = ContentBuilder::new(Markers::new("id")).with_host_file_urls(true);
        let local = builder.build(&spec("/home/me/bg.png", 0.2, 0.0, SizeMode::Cover));
        assert!(local
            .as_str()
            .contains("url('vscode-file://vscode-app/home/me/bg.png')"));

        let remote = builder.build(&spec("https://x.io/a.png", 0.2, 0.0, SizeMode::Cover));
        assert!(remote.as_str().contains("url('https://x.io/a.png')"));
    }

    #[test]
    fn test_hostile_image_reference_cannot_close_block() {
        let markers = Markers::new("id");
        let builder = ContentBuilder::new(markers.clone());
        let block = builder.build(&spec(
            "a'`${x}/*ext-id-end*/.png",
            0.2,
            0.0,
            SizeMode::Cover,
        ));
        let text = block.as_str();
        assert_eq!(markers.count_blocks(text), 1);
        assert!(text.ends_with(markers.end()));
        assert!(!text.contains("`${"));
        assert!(text.contains("a\\\\'\\`\\${x}"));
    }
}
