//! Builds the virtual file bundle handed to the external sandboxed bundler.
//!
//! The bundler owns compilation and rendering; this module only decides what
//! files it receives. Nothing flows back from the rendered preview.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::PreviewConfig;

static DEFAULT_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"export\s+default\b").expect("valid regex"));

const INDEX_TSX: &str = r#"import React from "react";
import ReactDOM from "react-dom/client";
import App from "./App";
import "./styles.css";

const root = ReactDOM.createRoot(document.getElementById("root")!);
root.render(
  <React.StrictMode>
    <App />
  </React.StrictMode>
);
"#;

const STYLES_CSS: &str = r#"@import url('https://cdn.jsdelivr.net/npm/tailwindcss@3.4.1/src/css/preflight.css');

body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewFile {
    pub code: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub active: bool,
}

impl PreviewFile {
    fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            active: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBundle {
    pub template: String,
    pub files: BTreeMap<String, PreviewFile>,
    /// npm package name to version range
    pub dependencies: BTreeMap<String, String>,
    pub external_resources: Vec<String>,
}

/// Whether the component source already provides a default export.
pub fn has_default_export(code: &str) -> bool {
    DEFAULT_EXPORT.is_match(code)
}

/// Entry module for the bundle: the code itself, or the code plus a default
/// `App` wrapper rendering `Component` when it exports nothing by default.
pub fn app_source(code: &str) -> String {
    if has_default_export(code) {
        code.to_string()
    } else {
        format!(
            "{}\n\nexport default function App() {{\n  return <Component />;\n}}\n",
            code.trim_end()
        )
    }
}

fn index_html(external_resources: &[String]) -> String {
    let scripts: String = external_resources
        .iter()
        .filter(|url| !url.ends_with(".css"))
        .map(|url| format!("    <script src=\"{}\"></script>\n", url))
        .collect();

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"UTF-8\" />\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\n    <title>Preview</title>\n{}  </head>\n  <body>\n    <div id=\"root\"></div>\n  </body>\n</html>\n",
        scripts
    )
}

pub fn build_bundle(code: &str, config: &PreviewConfig) -> PreviewBundle {
    let mut files = BTreeMap::new();
    files.insert(
        "/App.tsx".to_string(),
        PreviewFile {
            code: app_source(code),
            active: true,
        },
    );
    files.insert("/index.tsx".to_string(), PreviewFile::new(INDEX_TSX));
    files.insert("/styles.css".to_string(), PreviewFile::new(STYLES_CSS));
    files.insert(
        "/public/index.html".to_string(),
        PreviewFile::new(index_html(&config.external_resources)),
    );

    let dependencies = config
        .dependencies
        .iter()
        .map(|dep| match dep.rsplit_once('@').filter(|(name, _)| !name.is_empty()) {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (dep.clone(), "latest".to_string()),
        })
        .collect();

    PreviewBundle {
        template: config.template.clone(),
        files,
        dependencies,
        external_resources: config.external_resources.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> PreviewConfig {
        Config::default().preview
    }

    #[test]
    fn wraps_code_without_default_export() {
        let code = "function Component() { return <div>Hi</div> }";
        let bundle = build_bundle(code, &config());

        let app = &bundle.files["/App.tsx"];
        assert!(app.active);
        assert!(app.code.starts_with(code));
        assert!(app.code.contains("export default function App()"));
        assert!(app.code.contains("<Component />"));
    }

    #[test]
    fn keeps_code_with_default_export() {
        let code = "export  default function Pricing() {\n  return <section />;\n}";
        assert_eq!(app_source(code), code);
    }

    #[test]
    fn bundle_has_fixed_shell() {
        let bundle = build_bundle("export default () => null", &config());

        let paths: Vec<&str> = bundle.files.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/App.tsx", "/index.tsx", "/public/index.html", "/styles.css"]
        );
        assert_eq!(bundle.template, "react-ts");
        assert_eq!(bundle.dependencies["lucide-react"], "latest");
        assert!(
            bundle.files["/public/index.html"]
                .code
                .contains("<script src=\"https://cdn.tailwindcss.com\"></script>")
        );
        assert!(bundle.files["/index.tsx"].code.contains("createRoot"));
    }

    #[test]
    fn pinned_and_scoped_dependencies() {
        let mut preview = config();
        preview.dependencies = vec!["framer-motion@11".to_string(), "@heroicons/react".to_string()];
        let bundle = build_bundle("export default () => null", &preview);

        assert_eq!(bundle.dependencies["framer-motion"], "11");
        assert_eq!(bundle.dependencies["@heroicons/react"], "latest");
    }

    #[test]
    fn serializes_for_the_bundler() {
        let bundle = build_bundle("export default () => null", &config());
        let value = serde_json::to_value(&bundle).unwrap();

        assert_eq!(value["files"]["/App.tsx"]["active"], true);
        assert!(value["files"]["/index.tsx"].get("active").is_none());
        assert_eq!(value["externalResources"][0], "https://cdn.tailwindcss.com");
    }
}
