//! Platform table: the single source of per-target syntax differences.
//!
//! Every platform-dependent decision in the script transform and the
//! template compiler is a lookup here: loop and conditional attribute
//! names, event binding prefixes, element-name remapping, output
//! extensions and the runtime library file. No other module is allowed
//! to branch on the platform.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// The closed platform set. Selecting anything else fails the build before
/// any work begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Wx,
    Ali,
    Bu,
    Tt,
    Quick,
}

impl Platform {
    pub fn row(self) -> &'static PlatformRow {
        match self {
            Platform::Wx => &WX,
            Platform::Ali => &ALI,
            Platform::Bu => &BU,
            Platform::Tt => &TT,
            Platform::Quick => &QUICK,
        }
    }

    pub fn all() -> [Platform; 5] {
        [
            Platform::Wx,
            Platform::Ali,
            Platform::Bu,
            Platform::Tt,
            Platform::Quick,
        ]
    }
}

impl FromStr for Platform {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wx" => Ok(Platform::Wx),
            "ali" => Ok(Platform::Ali),
            "bu" => Ok(Platform::Bu),
            "tt" => Ok(Platform::Tt),
            "quick" => Ok(Platform::Quick),
            other => Err(CompileError::UnknownPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.row().env_id)
    }
}

/// One row of the platform table.
pub struct PlatformRow {
    /// Environment identifier literal substituted into scripts and used as
    /// the `tabBar.<env>List` key.
    pub env_id: &'static str,

    pub loop_attr: &'static str,
    pub loop_item_attr: &'static str,
    pub loop_index_attr: &'static str,
    /// `None` when the platform has no key directive.
    pub loop_key_attr: Option<&'static str>,
    /// Value carried by the key directive.
    pub loop_key_value: &'static str,

    pub if_attr: &'static str,
    pub else_if_attr: &'static str,
    pub else_attr: &'static str,

    /// Prefix for `on<Event>` bindings and whether the event name is
    /// lowercased after the prefix (`bindtap` vs `onTap`).
    pub bind_prefix: &'static str,
    pub catch_prefix: &'static str,
    pub lowercase_events: bool,

    pub template_ext: &'static str,
    pub style_ext: &'static str,
    pub script_ext: &'static str,

    /// Runtime library file under the `kaleido-runtime` package.
    pub runtime_file: &'static str,

    /// Marker tag a capitalized JSX reference is rewritten to; the original
    /// component name rides the `is` attribute.
    pub use_component_tag: &'static str,
}

static WX: PlatformRow = PlatformRow {
    env_id: "wx",
    loop_attr: "wx:for",
    loop_item_attr: "wx:for-item",
    loop_index_attr: "wx:for-index",
    loop_key_attr: Some("wx:key"),
    loop_key_value: "*this",
    if_attr: "wx:if",
    else_if_attr: "wx:elif",
    else_attr: "wx:else",
    bind_prefix: "bind",
    catch_prefix: "catch",
    lowercase_events: true,
    template_ext: ".wxml",
    style_ext: ".wxss",
    script_ext: ".js",
    runtime_file: "ReactWX.js",
    use_component_tag: "use-component",
};

static ALI: PlatformRow = PlatformRow {
    env_id: "ali",
    loop_attr: "a:for",
    loop_item_attr: "a:for-item",
    loop_index_attr: "a:for-index",
    loop_key_attr: Some("a:key"),
    loop_key_value: "*this",
    if_attr: "a:if",
    else_if_attr: "a:elif",
    else_attr: "a:else",
    bind_prefix: "on",
    catch_prefix: "catch",
    lowercase_events: false,
    template_ext: ".axml",
    style_ext: ".acss",
    script_ext: ".js",
    runtime_file: "ReactAli.js",
    use_component_tag: "use-component",
};

static BU: PlatformRow = PlatformRow {
    env_id: "bu",
    loop_attr: "s-for",
    loop_item_attr: "s-for-item",
    loop_index_attr: "s-for-index",
    loop_key_attr: None,
    loop_key_value: "*this",
    if_attr: "s-if",
    else_if_attr: "s-elif",
    else_attr: "s-else",
    bind_prefix: "bind",
    catch_prefix: "catch",
    lowercase_events: true,
    template_ext: ".swan",
    style_ext: ".css",
    script_ext: ".js",
    runtime_file: "ReactBu.js",
    use_component_tag: "use-component",
};

static TT: PlatformRow = PlatformRow {
    env_id: "tt",
    loop_attr: "tt:for",
    loop_item_attr: "tt:for-item",
    loop_index_attr: "tt:for-index",
    loop_key_attr: Some("tt:key"),
    loop_key_value: "*this",
    if_attr: "tt:if",
    else_if_attr: "tt:elif",
    else_attr: "tt:else",
    bind_prefix: "bind",
    catch_prefix: "catch",
    lowercase_events: true,
    template_ext: ".ttml",
    style_ext: ".ttss",
    script_ext: ".js",
    runtime_file: "ReactTT.js",
    use_component_tag: "use-component",
};

static QUICK: PlatformRow = PlatformRow {
    env_id: "quick",
    loop_attr: "for",
    loop_item_attr: "for-item",
    loop_index_attr: "for-index",
    loop_key_attr: None,
    loop_key_value: "*this",
    if_attr: "if",
    else_if_attr: "elif",
    else_attr: "else",
    bind_prefix: "on",
    catch_prefix: "catch",
    lowercase_events: true,
    template_ext: ".ux",
    style_ext: ".css",
    script_ext: ".js",
    runtime_file: "ReactQuick.js",
    use_component_tag: "use-component",
};

lazy_static! {
    /// Primitive tags that pass through untouched.
    static ref BUILT_IN_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "view",
            "text",
            "block",
            "image",
            "input",
            "textarea",
            "button",
            "form",
            "label",
            "icon",
            "progress",
            "checkbox",
            "checkbox-group",
            "radio",
            "radio-group",
            "slider",
            "switch",
            "picker",
            "scroll-view",
            "swiper",
            "swiper-item",
            "navigator",
            "audio",
            "video",
            "camera",
            "canvas",
            "map",
            "web-view",
            "rich-text",
            "cover-view",
            "cover-image",
            "slot",
        ] {
            s.insert(tag);
        }
        s
    };

    /// Block-level HTML-like tags remapped to the block primitive.
    static ref BLOCK_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "p", "div", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "quoteblock",
        ] {
            s.insert(tag);
        }
        s
    };

    /// Inline tags remapped to the inline primitive.
    static ref INLINE_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in ["span", "b", "s", "strong", "em", "bdo", "q", "code", "quote", "cite", "a"] {
            s.insert(tag);
        }
        s
    };
}

/// Whether a JSX tag refers to another compiled component rather than a
/// primitive.
pub fn is_component_tag(tag: &str) -> bool {
    tag.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
}

/// Remap an HTML-like tag to the platform primitive set. Capitalized tags
/// and built-ins pass through; unknown lowercase tags degrade to the block
/// primitive.
pub fn map_element_name(tag: &str) -> &str {
    if BUILT_IN_ELEMENTS.contains(tag) || is_component_tag(tag) {
        return tag;
    }
    if INLINE_ELEMENTS.contains(tag) {
        return "text";
    }
    // Block elements and anything unrecognized.
    "view"
}

/// Inline/block classification used by the text-tidy pass.
pub fn is_inline_element(tag: &str) -> bool {
    INLINE_ELEMENTS.contains(tag) || tag == "text"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_closed_set_only() {
        assert_eq!("wx".parse::<Platform>().unwrap(), Platform::Wx);
        assert_eq!("quick".parse::<Platform>().unwrap(), Platform::Quick);
        assert!(matches!(
            "web".parse::<Platform>(),
            Err(CompileError::UnknownPlatform(_))
        ));
        assert!(matches!(
            "WX".parse::<Platform>(),
            Err(CompileError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn rows_disagree_where_platforms_do() {
        assert_eq!(Platform::Wx.row().loop_attr, "wx:for");
        assert_eq!(Platform::Ali.row().loop_attr, "a:for");
        assert_eq!(Platform::Bu.row().if_attr, "s-if");
        assert!(Platform::Bu.row().loop_key_attr.is_none());
        assert_eq!(Platform::Tt.row().template_ext, ".ttml");
        assert_eq!(Platform::Ali.row().style_ext, ".acss");
    }

    #[test]
    fn element_mapping_follows_the_closed_tables() {
        assert_eq!(map_element_name("div"), "view");
        assert_eq!(map_element_name("h3"), "view");
        assert_eq!(map_element_name("span"), "text");
        assert_eq!(map_element_name("view"), "view");
        assert_eq!(map_element_name("scroll-view"), "scroll-view");
        assert_eq!(map_element_name("Row"), "Row");
        assert_eq!(map_element_name("article"), "view");
    }

    #[test]
    fn component_tag_detection() {
        assert!(is_component_tag("Row"));
        assert!(!is_component_tag("row"));
        assert!(!is_component_tag(""));
    }
}
