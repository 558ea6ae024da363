//! External schema reference resolution
//!
//! While a schema compiles, every `xs:import`, `xs:include` and `xs:redefine` it follows goes
//! through libxml2's external entity loader. The crate replaces that loader with a
//! trampoline which asks the [`SchemaResolver`] scoped to the compile running on the current
//! thread, and falls back to libxml2's default loader when there is none or it declines.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::ptr;
use std::sync::OnceLock;

use libc::{c_char, c_int};
use regex::Regex;

use crate::libxml2::{
    XML_CHAR_ENCODING_NONE, XmlExternalEntityLoader, XmlParserCtxt, XmlParserInput,
    borrow_xml_string, xmlCharStrdup, xmlFreeParserInputBuffer, xmlGetExternalEntityLoader,
    xmlNewIOInputStream, xmlParserInputBufferCreateMem, xmlSetExternalEntityLoader,
};

/// A reference the schema compiler needs resolved
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceRequest {
    /// Namespace of the referenced schema: the `namespace` of an import, or the target
    /// namespace of the including schema for includes and redefines
    pub namespace: Option<String>,
    /// Location as libxml2 asks for it, already resolved against `base_uri`
    pub system_id: String,
    pub public_id: Option<String>,
    /// Location of the schema document that declared the reference; `None` for the
    /// top-level schema
    pub base_uri: Option<String>,
}

impl ResourceRequest {
    pub fn new(system_id: impl Into<String>) -> Self {
        ResourceRequest {
            system_id: system_id.into(),
            ..Default::default()
        }
    }

    /// Last path segment of the system id
    pub fn file_name(&self) -> &str {
        file_name(&self.system_id)
    }
}

/// Resolves external schema references to schema bytes
///
/// Returning `None` means "not resolvable here"; libxml2's default resolution is then tried
/// for that reference.
///
/// A panic inside `resolve` is caught and treated as `None`, but the process panic hook
/// still runs and, by default, prints the message to stderr. Resolvers should report
/// failures by returning `None` rather than panicking.
#[cfg_attr(test, mockall::automock)]
pub trait SchemaResolver {
    fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>>;
}

impl<F> SchemaResolver for F
where
    F: Fn(&ResourceRequest) -> Option<Vec<u8>>,
{
    fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>> {
        self(request)
    }
}

/// Resolves references to files below a root directory
///
/// Relative locations are joined to the root. Absolute paths, URLs and locations that
/// climb out with `..` are looked up by file name only, so nothing outside the root is
/// ever read.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryResolver { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path under the root a system id maps to
    pub fn candidate(&self, system_id: &str) -> Option<PathBuf> {
        let location = system_id.strip_prefix("file://").unwrap_or(system_id);
        if location.is_empty() {
            return None;
        }

        let path = Path::new(location);
        let confined = !location.contains("://")
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        if confined {
            Some(self.root.join(path))
        } else {
            let name = file_name(location);
            (!name.is_empty() && name != "..").then(|| self.root.join(name))
        }
    }
}

impl SchemaResolver for DirectoryResolver {
    fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>> {
        self.candidate(&request.system_id)
            .and_then(|path| fs::read(path).ok())
    }
}

/// Resolves references from schemas held in memory
///
/// A request matches an entry by exact location first, then by file name.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    schemas: HashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, location: impl Into<String>, xsd: impl Into<Vec<u8>>) -> Self {
        self.insert(location, xsd);
        self
    }

    pub fn insert(&mut self, location: impl Into<String>, xsd: impl Into<Vec<u8>>) {
        self.schemas.insert(location.into(), xsd.into());
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaResolver for MemoryResolver {
    fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>> {
        if let Some(xsd) = self.schemas.get(&request.system_id) {
            return Some(xsd.clone());
        }

        let wanted = request.file_name();
        self.schemas
            .iter()
            .find(|(location, _)| file_name(location) == wanted)
            .map(|(_, xsd)| xsd.clone())
    }
}

fn file_name(location: &str) -> &str {
    location
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(location)
}

/// Cached regex for import/include/redefine elements
static REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for the schema element's targetNamespace
static TARGET_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

static NAMESPACE_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();

static SCHEMA_LOCATION_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_reference_regex() -> &'static Regex {
    REFERENCE_REGEX.get_or_init(|| {
        Regex::new(r"<(?:[\w.-]+:)?(import|include|redefine)\b([^>]*)>")
            .expect("Failed to compile schema reference regex")
    })
}

fn get_target_namespace_regex() -> &'static Regex {
    TARGET_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"<(?:[\w.-]+:)?schema\b[^>]*\btargetNamespace\s*=\s*["']([^"']*)["']"#)
            .expect("Failed to compile targetNamespace regex")
    })
}

fn get_namespace_attr_regex() -> &'static Regex {
    NAMESPACE_ATTR_REGEX.get_or_init(|| {
        Regex::new(r#"\bnamespace\s*=\s*["']([^"']*)["']"#)
            .expect("Failed to compile namespace attribute regex")
    })
}

fn get_schema_location_attr_regex() -> &'static Regex {
    SCHEMA_LOCATION_ATTR_REGEX.get_or_init(|| {
        Regex::new(r#"\bschemaLocation\s*=\s*["']([^"']*)["']"#)
            .expect("Failed to compile schemaLocation attribute regex")
    })
}

/// A reference declared by one schema document
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclaredReference {
    location: String,
    namespace: Option<String>,
    base_uri: Option<String>,
}

impl DeclaredReference {
    fn matches(&self, system_id: &str) -> bool {
        system_id == self.location || system_id == join_location(self.base_uri.as_deref(), &self.location)
    }
}

/// Resolve `location` against the directory of `base`, the way libxml2 builds URIs for
/// simple relative references
fn join_location(base: Option<&str>, location: &str) -> String {
    match base.and_then(|base| base.rfind('/').map(|slash| &base[..=slash])) {
        Some(dir) if !location.contains("://") && !location.starts_with('/') => {
            format!("{}{}", dir, location)
        }
        _ => location.to_string(),
    }
}

/// Scan a schema document for the references it declares
fn declared_references(xsd: &[u8], base_uri: Option<&str>) -> Vec<DeclaredReference> {
    let text = String::from_utf8_lossy(xsd);
    let target_namespace = get_target_namespace_regex()
        .captures(&text)
        .map(|caps| caps[1].to_owned());

    get_reference_regex()
        .captures_iter(&text)
        .filter_map(|caps| {
            let attrs = &caps[2];
            let location = get_schema_location_attr_regex().captures(attrs)?[1].to_owned();
            let namespace = if &caps[1] == "import" {
                get_namespace_attr_regex()
                    .captures(attrs)
                    .map(|ns| ns[1].to_owned())
            } else {
                target_namespace.clone()
            };
            Some(DeclaredReference {
                location,
                namespace,
                base_uri: base_uri.map(str::to_owned),
            })
        })
        .collect()
}

/// The resolver answering for the current thread
struct ActiveScope {
    resolver: *const (dyn SchemaResolver + 'static),
    references: Vec<DeclaredReference>,
}

impl ActiveScope {
    fn request_for(&self, system_id: &str, public_id: Option<String>) -> ResourceRequest {
        let declared = self.references.iter().find(|r| r.matches(system_id));
        ResourceRequest {
            namespace: declared.and_then(|r| r.namespace.clone()),
            system_id: system_id.to_string(),
            public_id,
            base_uri: declared.and_then(|r| r.base_uri.clone()),
        }
    }
}

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<ActiveScope>> = const { RefCell::new(None) };
}

/// Installs a resolver for the current thread until dropped
///
/// Scopes nest; dropping one restores the scope that was active before it. The scope must
/// be dropped, never forgotten, since the thread keeps an unchecked pointer to the
/// resolver; only schema compilation creates one.
pub(crate) struct ResolverScope<'r> {
    previous: Option<ActiveScope>,
    _resolver: PhantomData<&'r dyn SchemaResolver>,
}

impl<'r> ResolverScope<'r> {
    /// Enter a scope for compiling `xsd`, whose own references are scanned up front
    pub(crate) fn enter(resolver: &'r dyn SchemaResolver, xsd: &[u8]) -> Self {
        // The guard keeps `'r` alive for as long as the pointer is reachable.
        let resolver: &'static dyn SchemaResolver = unsafe {
            std::mem::transmute::<&'r dyn SchemaResolver, &'static dyn SchemaResolver>(resolver)
        };
        let scope = ActiveScope {
            resolver: resolver as *const dyn SchemaResolver,
            references: declared_references(xsd, None),
        };
        let previous = ACTIVE_SCOPE.with(|active| active.borrow_mut().replace(scope));

        ResolverScope {
            previous,
            _resolver: PhantomData,
        }
    }
}

impl Drop for ResolverScope<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_SCOPE.with(|active| *active.borrow_mut() = previous);
    }
}

/// libxml2's loader as it was before ours was installed
static DEFAULT_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Route libxml2's external entity loading through the current thread's scope
///
/// # Safety
///
/// Must run once, after `xmlInitParser` and before any schema is compiled.
pub(crate) unsafe fn install_entity_loader() {
    let default = unsafe { xmlGetExternalEntityLoader() };
    if DEFAULT_LOADER.set(default).is_ok() {
        unsafe { xmlSetExternalEntityLoader(Some(scoped_entity_loader)) };
    }
}

unsafe extern "C" fn scoped_entity_loader(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let system_id = unsafe { borrow_xml_string(url) };
    let public_id = unsafe { borrow_xml_string(id) };

    if let Some(system_id) = system_id {
        if let Some(input) = resolve_in_scope(&system_id, public_id, ctxt) {
            return input;
        }
    }

    match DEFAULT_LOADER.get().copied().flatten() {
        Some(default) => unsafe { default(url, id, ctxt) },
        None => ptr::null_mut(),
    }
}

fn resolve_in_scope(
    system_id: &str,
    public_id: Option<String>,
    ctxt: *mut XmlParserCtxt,
) -> Option<*mut XmlParserInput> {
    let (resolver, request) = ACTIVE_SCOPE.with(|active| {
        let active = active.borrow();
        let scope = active.as_ref()?;
        Some((scope.resolver, scope.request_for(system_id, public_id)))
    })?;

    // A panic must not unwind into libxml2; treat it as a declined reference.
    let xsd = panic::catch_unwind(AssertUnwindSafe(|| unsafe { (*resolver).resolve(&request) }))
        .ok()
        .flatten()?;

    ACTIVE_SCOPE.with(|active| {
        if let Some(scope) = active.borrow_mut().as_mut() {
            let nested = declared_references(&xsd, Some(&request.system_id));
            scope.references.extend(nested);
        }
    });

    unsafe { input_from_bytes(&xsd, &request.system_id, ctxt) }
}

/// Wrap resolved bytes in a parser input named after the requested location, so nested
/// relative references resolve against it
unsafe fn input_from_bytes(
    xsd: &[u8],
    system_id: &str,
    ctxt: *mut XmlParserCtxt,
) -> Option<*mut XmlParserInput> {
    let size = c_int::try_from(xsd.len()).ok()?;

    unsafe {
        let buffer = xmlParserInputBufferCreateMem(
            xsd.as_ptr() as *const c_char,
            size,
            XML_CHAR_ENCODING_NONE,
        );
        if buffer.is_null() {
            return None;
        }

        let input = xmlNewIOInputStream(ctxt, buffer, XML_CHAR_ENCODING_NONE);
        if input.is_null() {
            xmlFreeParserInputBuffer(buffer);
            return None;
        }

        if let Ok(name) = CString::new(system_id) {
            (*input).filename = xmlCharStrdup(name.as_ptr());
        }
        Some(input)
    }
}
