//! # Templates
//!
//! Workbooks can be built from a template that renders to HTML. Rendering engines plug in
//! through [`TemplateRenderer`]; prepared renderers are expensive to build, so
//! [`RendererCache`] keeps one per key until it is invalidated.
//!
//! [`PlaceholderRenderer`] is a minimal engine substituting `${name}` placeholders.
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Captures;
use regex::Regex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template variable '{0}' is not defined")]
    MissingVariable(String),

    #[error("Template failed to render: {0}")]
    Render(String),
}

/// Renders a template with a context into an HTML document or fragment.
pub trait TemplateRenderer {
    type Context: ?Sized;

    fn render(&self, template: &str, context: &Self::Context) -> Result<String, TemplateError>;
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}").unwrap();
}

/// Substitutes `${name}` with the HTML-escaped value of `name`.
#[derive(Copy, Clone, Debug, Default)]
pub struct PlaceholderRenderer {
    /// Render missing variables as empty text instead of failing
    pub lenient: bool,
}

impl TemplateRenderer for PlaceholderRenderer {
    type Context = HashMap<String, String>;

    fn render(&self, template: &str, context: &Self::Context) -> Result<String, TemplateError> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(template, |captures: &Captures| {
            let name = &captures[1];
            match context.get(name) {
                // Values may land in text or in a double-quoted attribute.
                Some(value) => html_escape::encode_double_quoted_attribute(value).into_owned(),
                None => {
                    missing.get_or_insert_with(|| name.to_owned());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) if !self.lenient => Err(TemplateError::MissingVariable(name)),
            _ => Ok(rendered.into_owned()),
        }
    }
}

/// Shared cache of prepared renderers, safe for concurrent use.
#[derive(Debug)]
pub struct RendererCache<K, R> {
    renderers: RwLock<HashMap<K, Arc<R>>>,
}

impl<K, R> Default for RendererCache<K, R> {
    fn default() -> Self {
        RendererCache { renderers: RwLock::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone, R> RendererCache<K, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached renderer for `key`, preparing it with `create` on a miss.
    /// A failed preparation caches nothing.
    pub fn get_or_create<F, E>(&self, key: &K, create: F) -> Result<Arc<R>, E>
    where
        F: FnOnce(&K) -> Result<R, E>,
    {
        if let Some(renderer) = self.renderers.read().get(key) {
            return Ok(Arc::clone(renderer));
        }
        let mut renderers = self.renderers.write();
        if let Some(renderer) = renderers.get(key) {
            return Ok(Arc::clone(renderer));
        }
        let renderer = Arc::new(create(key)?);
        renderers.insert(key.clone(), Arc::clone(&renderer));
        Ok(renderer)
    }

    /// Drops the renderer for `key`; the next lookup prepares a fresh one.
    pub fn invalidate(&self, key: &K) -> Option<Arc<R>> {
        self.renderers.write().remove(key)
    }

    pub fn clear(&self) {
        self.renderers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.renderers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.read().is_empty()
    }
}
