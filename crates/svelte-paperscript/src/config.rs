//! Configuration loading.

use camino::Utf8Path;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use swc_common::SourceMap;
use swc_ecma_ast::{
    CallExpr, Callee, Decl, ExportDefaultExpr, Expr, KeyValueProp, Lit, MemberProp, ModuleDecl,
    ModuleItem, ObjectLit, Pat, Prop, PropName, PropOrSpread, Stmt,
};
use swc_ecma_parser::{parse_file_as_module, EsSyntax, Syntax, TsSyntax};
use swc_ecma_visit::{Visit, VisitWith};

/// Name of the preprocessor factory exported by the JavaScript package.
const PREPROCESS_FN: &str = "paperscriptPreprocess";

/// The parts of a Svelte project configuration this tool reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SvelteConfig {
    /// File extensions to process.
    pub extensions: Vec<String>,

    /// Options of the `paperscriptPreprocess(...)` call, if the config has one.
    pub preprocess: Option<PreprocessConfig>,
}

/// Options passed to `paperscriptPreprocess` in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// The literal `sourceMap` option.
    pub source_map: Option<bool>,
}

/// Config file names, in lookup order.
pub const CONFIG_FILES: [&str; 3] = ["svelte.config.js", "svelte.config.mjs", "svelte.config.ts"];

impl SvelteConfig {
    /// Loads configuration from a svelte.config.js file.
    pub fn load(project_root: &Utf8Path) -> Self {
        for config_file in CONFIG_FILES {
            let config_path = project_root.join(config_file);
            if config_path.exists() {
                return match Self::parse_config(&config_path) {
                    Ok(config) => {
                        tracing::debug!(path = %config_path, ?config, "loaded svelte config");
                        config
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse {}: {}", config_path, e);
                        Self::default()
                    }
                };
            }
        }

        Self::default()
    }

    /// Parses a svelte.config.js or svelte.config.ts file using SWC.
    fn parse_config(path: &Utf8Path) -> Result<Self, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::parse_source(path.as_str(), content)
    }

    fn parse_source(name: &str, content: String) -> Result<Self, String> {
        let cm: Arc<SourceMap> = Default::default();
        let fm = cm.new_source_file(
            swc_common::FileName::Custom(name.to_string()).into(),
            content,
        );

        let syntax = if name.ends_with(".ts") {
            Syntax::Typescript(TsSyntax {
                tsx: false,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                jsx: false,
                ..Default::default()
            })
        };

        let module = parse_file_as_module(
            &fm,
            syntax,
            swc_ecma_ast::EsVersion::Es2022,
            None,
            &mut Vec::new(),
        )
        .map_err(|e| format!("Parse error: {:?}", e))?;

        let mut config = SvelteConfig::default();

        // `const config = {...}; export default config;` is the common layout.
        let mut objects: HashMap<&str, &ObjectLit> = HashMap::new();
        for item in &module.body {
            if let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = item {
                for decl in &var.decls {
                    if let (Pat::Ident(binding), Some(init)) = (&decl.name, &decl.init) {
                        if let Expr::Object(obj) = init.as_ref() {
                            objects.insert(binding.id.sym.as_str(), obj);
                        }
                    }
                }
            }
        }

        for item in &module.body {
            if let ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(ExportDefaultExpr {
                expr,
                ..
            })) = item
            {
                let obj = match expr.as_ref() {
                    Expr::Object(obj) => Some(obj),
                    Expr::Ident(ident) => objects.get(ident.sym.as_str()).copied(),
                    _ => None,
                };
                if let Some(obj) = obj {
                    Self::extract_extensions(obj, &mut config);
                }
            }
        }

        let mut finder = PreprocessCallFinder::default();
        module.visit_with(&mut finder);
        config.preprocess = finder.found;

        Ok(config)
    }

    /// Gets a string value from a PropName.
    fn prop_name_str(key: &PropName) -> Option<&str> {
        match key {
            PropName::Ident(ident) => Some(ident.sym.as_str()),
            PropName::Str(s) => s.value.as_str(),
            _ => None,
        }
    }

    /// Extracts the `extensions` array from the exported object.
    fn extract_extensions(obj: &ObjectLit, config: &mut SvelteConfig) {
        for prop in &obj.props {
            if let PropOrSpread::Prop(prop) = prop {
                if let Prop::KeyValue(KeyValueProp { key, value }) = prop.as_ref() {
                    if Self::prop_name_str(key) != Some("extensions") {
                        continue;
                    }
                    if let Expr::Array(arr) = value.as_ref() {
                        for elem in arr.elems.iter().flatten() {
                            if let Expr::Lit(Lit::Str(s)) = elem.expr.as_ref() {
                                if let Some(ext) = s.value.as_str() {
                                    config.extensions.push(ext.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns the file extensions to process.
    pub fn file_extensions(&self) -> Vec<&str> {
        if self.extensions.is_empty() {
            vec![".svelte"]
        } else {
            self.extensions.iter().map(|s| s.as_str()).collect()
        }
    }

    /// Resolves the source map setting: command line, then config, then `true`.
    pub fn source_map(&self, cli_override: Option<bool>) -> bool {
        cli_override
            .or_else(|| self.preprocess.as_ref().and_then(|p| p.source_map))
            .unwrap_or(true)
    }
}

/// Finds the first `paperscriptPreprocess(...)` call anywhere in the module.
#[derive(Default)]
struct PreprocessCallFinder {
    found: Option<PreprocessConfig>,
}

impl PreprocessCallFinder {
    fn is_preprocess_call(call: &CallExpr) -> bool {
        match &call.callee {
            Callee::Expr(expr) => match expr.as_ref() {
                Expr::Ident(ident) => ident.sym.as_str() == PREPROCESS_FN,
                Expr::Member(member) => {
                    matches!(&member.prop, MemberProp::Ident(prop) if prop.sym.as_str() == PREPROCESS_FN)
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn options(call: &CallExpr) -> PreprocessConfig {
        let mut options = PreprocessConfig::default();
        let Some(Expr::Object(obj)) = call.args.first().map(|arg| arg.expr.as_ref()) else {
            return options;
        };

        for prop in &obj.props {
            if let PropOrSpread::Prop(prop) = prop {
                if let Prop::KeyValue(KeyValueProp { key, value }) = prop.as_ref() {
                    if SvelteConfig::prop_name_str(key) == Some("sourceMap") {
                        if let Expr::Lit(Lit::Bool(b)) = value.as_ref() {
                            options.source_map = Some(b.value);
                        }
                    }
                }
            }
        }
        options
    }
}

impl Visit for PreprocessCallFinder {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if self.found.is_none() && Self::is_preprocess_call(call) {
            self.found = Some(Self::options(call));
            return;
        }
        call.visit_children_with(self);
    }
}
