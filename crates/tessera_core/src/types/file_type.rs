use std::hash::Hash;

use serde::Deserialize;
use serde::Serialize;

/// Represents a file type by its extension
///
/// Bundles are typed too: every asset in a bundle shares the bundle's file type, and a change of
/// type along a dependency puts the target asset into a sibling bundle.
///
/// Defaults to `FileType::Js` for convenience.
#[derive(Default, Debug, Clone, Eq, PartialEq, Hash)]
pub enum FileType {
  Css,
  Html,
  #[default]
  Js,
  Json,
  Png,
  Svg,
  Wasm,
  Other(String),
}

impl Serialize for FileType {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.extension().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FileType {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let ext: String = Deserialize::deserialize(deserializer)?;
    Ok(Self::from_extension(&ext))
  }
}

impl FileType {
  pub fn extension(&self) -> &str {
    match self {
      FileType::Css => "css",
      FileType::Html => "html",
      FileType::Js => "js",
      FileType::Json => "json",
      FileType::Png => "png",
      FileType::Svg => "svg",
      FileType::Wasm => "wasm",
      FileType::Other(s) => s.as_str(),
    }
  }

  /// Maps an extension to the type of the code it compiles to, so `ts` and `jsx` are both `Js`.
  pub fn from_extension(ext: &str) -> Self {
    match ext {
      "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => FileType::Js,
      "css" => FileType::Css,
      "html" | "htm" => FileType::Html,
      "json" => FileType::Json,
      "png" => FileType::Png,
      "svg" => FileType::Svg,
      "wasm" => FileType::Wasm,
      ext => FileType::Other(ext.to_string()),
    }
  }
}
