//! LibXML2 FFI Wrapper Module
//!
//! This module provides safe wrappers around the libxml2 calls the crate needs: parsing a
//! document into a tree, compiling an XSD schema, validating a tree, validating a byte stream
//! through the pull reader, copying and serializing trees.
//!
//! ## Resource Management
//!
//! Every libxml2 object created here is owned by a small RAII type (`CompiledSchema`,
//! `ValidContext`, `TextReader`, [`Document`]) whose `Drop` releases it, so a call never
//! leaks contexts on early returns.
//!
//! ## Diagnostics
//!
//! libxml2 reports problems through callbacks. Each call installs an `ErrorCapture`, which
//! points libxml2's per-thread structured error channel at a call-local `Vec<Diagnostic>`.
//! Contexts that accept a handler of their own are given the same list. Nothing reaches
//! libxml2's default stderr output, and the list is read back only once the owning context
//! has been freed.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser` is not thread-safe and runs exactly once behind
//!   `std::sync::Once`.
//! - **Schema parsing**: serialized behind `SCHEMA_COMPILE_LOCK`; the schema parser and the
//!   external entity loader hook it consults are not safe to run concurrently.
//! - **Validation**: fully parallel, each call creates its own validation context.

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, Once, PoisonError};

use libc::{c_char, c_int, c_long, c_ushort, c_void};

use crate::document::{Attribute, Document, QualifiedName};
use crate::error::{LibXml2Error, LibXml2Result, Severity};
use crate::events::{EventHandler, XmlEvent};
use crate::resolver::{self, SchemaResolver};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema compilation (see module docs)
static SCHEMA_COMPILE_LOCK: Mutex<()> = Mutex::new(());

// xmlParserOption
pub const XML_PARSE_NOERROR: c_int = 1 << 5;
pub const XML_PARSE_NOWARNING: c_int = 1 << 6;
pub const XML_PARSE_NOBLANKS: c_int = 1 << 8;
pub const XML_PARSE_NONET: c_int = 1 << 11;
pub const XML_PARSE_HUGE: c_int = 1 << 19;

// xmlSchemaValidOption
pub const XML_SCHEMA_VAL_VC_I_CREATE: c_int = 1 << 0;

// xmlErrorDomain
pub const XML_FROM_PARSER: c_int = 1;
pub const XML_FROM_NAMESPACE: c_int = 3;
pub const XML_FROM_IO: c_int = 8;
#[cfg(test)]
pub const XML_FROM_SCHEMASP: c_int = 16;
pub const XML_FROM_SCHEMASV: c_int = 17;

// xmlElementType
pub const XML_ELEMENT_NODE: c_int = 1;

// xmlReaderTypes
const XML_READER_TYPE_ELEMENT: c_int = 1;
const XML_READER_TYPE_TEXT: c_int = 3;
const XML_READER_TYPE_CDATA: c_int = 4;
const XML_READER_TYPE_PROCESSING_INSTRUCTION: c_int = 7;
const XML_READER_TYPE_COMMENT: c_int = 8;
const XML_READER_TYPE_WHITESPACE: c_int = 13;
const XML_READER_TYPE_SIGNIFICANT_WHITESPACE: c_int = 14;
const XML_READER_TYPE_END_ELEMENT: c_int = 15;

// xmlCharEncoding
pub const XML_CHAR_ENCODING_NONE: c_int = 0;

const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// ## Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlTextReader {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInputBuffer {
    _private: [u8; 0],
}

/// Leading fields of `xmlParserInput`; only `filename` is ever written
#[allow(dead_code)]
#[repr(C)]
pub struct XmlParserInput {
    pub buf: *mut XmlParserInputBuffer,
    pub filename: *const c_char,
    _rest: [u8; 0],
}

#[allow(dead_code)]
#[repr(C)]
pub struct XmlNs {
    pub next: *mut XmlNs,
    pub ns_type: c_int,
    pub href: *const c_char,
    pub prefix: *const c_char,
    pub _private: *mut c_void,
    pub context: *mut XmlDoc,
}

#[allow(dead_code)]
#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const c_char,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
    pub content: *mut c_char,
    pub properties: *mut XmlAttr,
    pub ns_def: *mut XmlNs,
    pub psvi: *mut c_void,
    pub line: c_ushort,
    pub extra: c_ushort,
}

#[allow(dead_code)]
#[repr(C)]
pub struct XmlAttr {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const c_char,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlAttr,
    pub prev: *mut XmlAttr,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
    pub atype: c_int,
    pub psvi: *mut c_void,
}

#[allow(non_camel_case_types, dead_code)]
#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub static xmlFree: XmlFreeFunc;

    pub fn xmlInitParser();

    // Error channels
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
    pub fn __xmlStructuredError() -> *mut XmlStructuredErrorFunc;
    pub fn __xmlStructuredErrorContext() -> *mut *mut c_void;
    pub fn xmlGetLastError() -> *const xmlError;
    pub fn xmlResetLastError();

    // Document parsing
    pub fn xmlNewParserCtxt() -> *mut XmlParserCtxt;
    pub fn xmlFreeParserCtxt(ctxt: *mut XmlParserCtxt);
    pub fn xmlCtxtReadMemory(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlCtxtGetLastError(ctx: *mut c_void) -> *const xmlError;

    // Tree access
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlCopyDoc(doc: *mut XmlDoc, recursive: c_int) -> *mut XmlDoc;
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlGetProp(node: *const XmlNode, name: *const c_char) -> *mut c_char;
    pub fn xmlGetNsProp(
        node: *const XmlNode,
        name: *const c_char,
        namespace: *const c_char,
    ) -> *mut c_char;
    pub fn xmlNodeGetContent(node: *const XmlNode) -> *mut c_char;
    pub fn xmlNodeListGetString(doc: *mut XmlDoc, list: *const XmlNode, in_line: c_int)
    -> *mut c_char;
    pub fn xmlGetLineNo(node: *const XmlNode) -> c_long;
    pub fn xmlDocDumpFormatMemoryEnc(
        doc: *mut XmlDoc,
        mem: *mut *mut c_char,
        size: *mut c_int,
        encoding: *const c_char,
        format: c_int,
    );

    // Input plumbing for the external entity loader
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(f: XmlExternalEntityLoader);
    pub fn xmlParserInputBufferCreateMem(
        mem: *const c_char,
        size: c_int,
        enc: c_int,
    ) -> *mut XmlParserInputBuffer;
    pub fn xmlFreeParserInputBuffer(buffer: *mut XmlParserInputBuffer);
    pub fn xmlNewIOInputStream(
        ctxt: *mut XmlParserCtxt,
        input: *mut XmlParserInputBuffer,
        enc: c_int,
    ) -> *mut XmlParserInput;
    pub fn xmlCharStrdup(cur: *const c_char) -> *mut c_char;

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *mut XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *mut XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidOptions(ctxt: *mut XmlSchemaValidCtxt, options: c_int) -> c_int;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    // Pull reader
    pub fn xmlReaderForMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlTextReader;
    pub fn xmlFreeTextReader(reader: *mut XmlTextReader);
    pub fn xmlTextReaderSetSchema(reader: *mut XmlTextReader, schema: *mut XmlSchema) -> c_int;
    pub fn xmlTextReaderRead(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderNodeType(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderIsEmptyElement(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderConstLocalName(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstName(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstNamespaceUri(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstPrefix(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstValue(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderMoveToNextAttribute(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderMoveToElement(reader: *mut XmlTextReader) -> c_int;
}

/// One message reported by libxml2 through a structured error handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub domain: c_int,
    pub severity: Option<Severity>,
    pub line: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    /// Reported by the schema validity checker rather than the parser or compiler
    pub fn is_validity(&self) -> bool {
        self.domain == XML_FROM_SCHEMASV
    }

    /// Reported by the parser itself: the input is not well-formed or namespace-valid
    pub fn is_wellformedness(&self) -> bool {
        matches!(self.domain, XML_FROM_PARSER | XML_FROM_NAMESPACE)
    }

    /// Raised while loading an external resource
    pub fn is_loader(&self) -> bool {
        self.domain == XML_FROM_IO
    }

    /// Error or fatal severity; warnings and `XML_ERR_NONE` are not
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Some(Severity::Error | Severity::Fatal))
    }

    fn from_raw(error: &xmlError) -> Self {
        let message = unsafe { borrow_xml_string(error.message) }
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("libxml2 error code {}", error.code));

        Diagnostic {
            domain: error.domain,
            severity: Severity::from_level(error.level),
            line: u32::try_from(error.line).ok().filter(|&line| line > 0),
            message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Callback for libxml2 to report diagnostics (structured)
///
/// `user_data` must point to a live `Vec<Diagnostic>`.
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }

    let diagnostics = unsafe { &mut *(user_data as *mut Vec<Diagnostic>) };
    let error = unsafe { &*error };
    diagnostics.push(Diagnostic::from_raw(error));
}

/// Collects every diagnostic raised on the current thread until dropped
///
/// Dropping restores the structured handler that was installed before.
struct ErrorCapture {
    sink: NonNull<Vec<Diagnostic>>,
    previous_handler: XmlStructuredErrorFunc,
    previous_context: *mut c_void,
}

impl ErrorCapture {
    fn install() -> Self {
        let sink = NonNull::from(Box::leak(Box::new(Vec::new())));
        let (previous_handler, previous_context) =
            unsafe { (*__xmlStructuredError(), *__xmlStructuredErrorContext()) };

        let capture = ErrorCapture {
            sink,
            previous_handler,
            previous_context,
        };
        unsafe { xmlSetStructuredErrorFunc(capture.user_data(), Some(structured_error_callback)) };
        capture
    }

    /// User data for [`structured_error_callback`]
    fn user_data(&self) -> *mut c_void {
        self.sink.as_ptr() as *mut c_void
    }

    fn finish(self) -> Vec<Diagnostic> {
        unsafe { std::mem::take(&mut *self.sink.as_ptr()) }
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe {
            xmlSetStructuredErrorFunc(self.previous_context, self.previous_handler);
            drop(Box::from_raw(self.sink.as_ptr()));
        }
    }
}

/// Join the error-level diagnostics into one message
fn summarize(diagnostics: &[Diagnostic], fallback: &str) -> String {
    summarize_where(diagnostics, Diagnostic::is_error, fallback)
}

fn summarize_where(
    diagnostics: &[Diagnostic],
    keep: impl Fn(&Diagnostic) -> bool,
    fallback: &str,
) -> String {
    let messages: Vec<String> = diagnostics
        .iter()
        .filter(|d| keep(d))
        .map(|d| d.to_string())
        .collect();

    if messages.is_empty() {
        fallback.to_string()
    } else {
        messages.join("; ")
    }
}

fn buffer_len(data: &[u8]) -> LibXml2Result<c_int> {
    c_int::try_from(data.len()).map_err(|_| LibXml2Error::InputTooLarge { size: data.len() })
}

/// Release memory handed out by libxml2
///
/// # Safety
///
/// `ptr` must be null or have been allocated by libxml2's allocator.
pub(crate) unsafe fn free_xml(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if let Some(free) = unsafe { xmlFree } {
        unsafe { free(ptr) };
    }
}

/// Copy a libxml2-owned string that the caller must release, then release it
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string allocated by libxml2.
pub(crate) unsafe fn take_xml_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { free_xml(ptr as *mut c_void) };
    Some(value)
}

/// Copy a string still owned by libxml2
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string valid for the duration of the call.
pub(crate) unsafe fn borrow_xml_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// A compiled XSD schema, freed on drop
#[derive(Debug)]
pub struct CompiledSchema {
    ptr: NonNull<XmlSchema>,
}

impl CompiledSchema {
    pub(crate) fn as_ptr(&self) -> *mut XmlSchema {
        self.ptr.as_ptr()
    }
}

impl Drop for CompiledSchema {
    fn drop(&mut self) {
        unsafe { xmlSchemaFree(self.ptr.as_ptr()) };
    }
}

/// Validation context bound to one compiled schema
struct ValidContext<'s> {
    ptr: NonNull<XmlSchemaValidCtxt>,
    _schema: PhantomData<&'s CompiledSchema>,
}

impl<'s> ValidContext<'s> {
    fn new(schema: &'s CompiledSchema) -> LibXml2Result<Self> {
        let ptr = unsafe { xmlSchemaNewValidCtxt(schema.as_ptr()) };
        NonNull::new(ptr)
            .map(|ptr| ValidContext {
                ptr,
                _schema: PhantomData,
            })
            .ok_or(LibXml2Error::ValidationContextCreationFailed)
    }
}

impl Drop for ValidContext<'_> {
    fn drop(&mut self) {
        unsafe { xmlSchemaFreeValidCtxt(self.ptr.as_ptr()) };
    }
}

/// Pull reader over a borrowed buffer; libxml2 does not copy the input
struct TextReader<'a> {
    ptr: NonNull<XmlTextReader>,
    _input: PhantomData<&'a [u8]>,
}

impl<'a> TextReader<'a> {
    fn for_memory(xml: &'a [u8], options: c_int) -> LibXml2Result<Self> {
        let size = buffer_len(xml)?;
        let ptr = unsafe {
            xmlReaderForMemory(
                xml.as_ptr() as *const c_char,
                size,
                ptr::null(),
                ptr::null(),
                options,
            )
        };
        NonNull::new(ptr)
            .map(|ptr| TextReader {
                ptr,
                _input: PhantomData,
            })
            .ok_or(LibXml2Error::ReaderCreationFailed)
    }

    fn raw(&self) -> *mut XmlTextReader {
        self.ptr.as_ptr()
    }

    fn qualified_name(&self) -> QualifiedName {
        unsafe {
            let local_name = borrow_xml_string(xmlTextReaderConstLocalName(self.raw()))
                .or_else(|| borrow_xml_string(xmlTextReaderConstName(self.raw())))
                .unwrap_or_default();
            QualifiedName {
                local_name,
                namespace: borrow_xml_string(xmlTextReaderConstNamespaceUri(self.raw())),
                prefix: borrow_xml_string(xmlTextReaderConstPrefix(self.raw())),
            }
        }
    }

    fn value(&self) -> String {
        unsafe { borrow_xml_string(xmlTextReaderConstValue(self.raw())) }.unwrap_or_default()
    }

    /// Attributes of the current element, leaving the cursor on the element
    fn attributes(&self) -> Vec<Attribute> {
        let mut attributes = Vec::new();
        unsafe {
            while xmlTextReaderMoveToNextAttribute(self.raw()) == 1 {
                let name = self.qualified_name();
                if name.namespace.as_deref() == Some(XMLNS_NAMESPACE) {
                    continue;
                }
                attributes.push(Attribute {
                    name,
                    value: self.value(),
                });
            }
            xmlTextReaderMoveToElement(self.raw());
        }
        attributes
    }

    /// Events for the node the reader is positioned on
    fn current_events(&self) -> Vec<XmlEvent> {
        match unsafe { xmlTextReaderNodeType(self.raw()) } {
            XML_READER_TYPE_ELEMENT => {
                let is_empty = unsafe { xmlTextReaderIsEmptyElement(self.raw()) } == 1;
                let name = self.qualified_name();
                let attributes = self.attributes();
                let mut events = vec![XmlEvent::StartElement {
                    name: name.clone(),
                    attributes,
                }];
                if is_empty {
                    events.push(XmlEvent::EndElement { name });
                }
                events
            }
            XML_READER_TYPE_END_ELEMENT => vec![XmlEvent::EndElement {
                name: self.qualified_name(),
            }],
            XML_READER_TYPE_TEXT
            | XML_READER_TYPE_WHITESPACE
            | XML_READER_TYPE_SIGNIFICANT_WHITESPACE => vec![XmlEvent::Text(self.value())],
            XML_READER_TYPE_CDATA => vec![XmlEvent::CData(self.value())],
            XML_READER_TYPE_COMMENT => vec![XmlEvent::Comment(self.value())],
            XML_READER_TYPE_PROCESSING_INSTRUCTION => vec![XmlEvent::ProcessingInstruction {
                target: self.qualified_name().local_name,
                data: self.value(),
            }],
            _ => Vec::new(),
        }
    }
}

impl Drop for TextReader<'_> {
    fn drop(&mut self) {
        unsafe { xmlFreeTextReader(self.ptr.as_ptr()) };
    }
}

/// Outcome of a streaming validation pass
#[derive(Debug, Default)]
pub struct StreamRun {
    pub diagnostics: Vec<Diagnostic>,
    pub delivered: usize,
}

/// Safe access to the libxml2 operations used by the builder and validator
///
/// Creating a wrapper initializes libxml2 (once per process) and installs the scoped
/// external entity loader used for schema resolution.
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            resolver::install_entity_loader();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a namespace-aware document tree from memory
    ///
    /// Namespace errors (such as an unbound prefix) are recoverable for libxml2 but are
    /// treated as failures here, as is any error-level diagnostic.
    pub fn parse_document(&self, xml: &[u8], options: c_int) -> LibXml2Result<Document> {
        let size = buffer_len(xml)?;
        let capture = ErrorCapture::install();

        unsafe {
            let ctxt = xmlNewParserCtxt();
            if ctxt.is_null() {
                return Err(LibXml2Error::ParserContextCreationFailed);
            }

            let doc = xmlCtxtReadMemory(
                ctxt,
                xml.as_ptr() as *const c_char,
                size,
                ptr::null(),
                ptr::null(),
                options | XML_PARSE_NOERROR | XML_PARSE_NOWARNING,
            );

            let last_error = xmlCtxtGetLastError(ctxt as *mut c_void)
                .as_ref()
                .map(Diagnostic::from_raw)
                .filter(Diagnostic::is_error);

            xmlFreeParserCtxt(ctxt);

            // The context keeps only its most recent error, which a later warning may
            // replace; the captured list keeps all of them.
            let diagnostics = capture.finish();
            let failure = if diagnostics.iter().any(Diagnostic::is_error) {
                Some(summarize(&diagnostics, ""))
            } else {
                last_error.map(|d| d.to_string())
            };

            match (NonNull::new(doc), failure) {
                (Some(doc), None) => Ok(Document::from_raw(doc)),
                (doc, failure) => {
                    if let Some(doc) = doc {
                        xmlFreeDoc(doc.as_ptr());
                    }
                    Err(LibXml2Error::DocumentParseFailed {
                        details: failure
                            .unwrap_or_else(|| "no document was produced".to_string()),
                    })
                }
            }
        }
    }

    /// Compile an XSD schema from memory
    ///
    /// When `resolver` is given it answers every external reference the compiler follows
    /// during this call; references it declines fall through to libxml2's default loader.
    pub fn compile_schema(
        &self,
        xsd: &[u8],
        resolver: Option<&dyn SchemaResolver>,
    ) -> LibXml2Result<CompiledSchema> {
        let size = buffer_len(xsd)?;
        let _lock = SCHEMA_COMPILE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _scope = resolver.map(|r| resolver::ResolverScope::enter(r, xsd));
        let capture = ErrorCapture::install();

        let schema_ptr = unsafe {
            let parser_ctxt = xmlSchemaNewMemParserCtxt(xsd.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                capture.user_data(),
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);
            schema_ptr
        };

        let diagnostics = capture.finish();
        match NonNull::new(schema_ptr) {
            Some(ptr) => Ok(CompiledSchema { ptr }),
            None => Err(LibXml2Error::SchemaParseFailed {
                details: summarize_where(
                    &diagnostics,
                    |d| d.is_error() || d.is_loader(),
                    "the schema could not be compiled",
                ),
            }),
        }
    }

    /// Validate a tree in place, returning every diagnostic reported during the run
    ///
    /// With `materialize_defaults` the validator writes schema default and fixed values
    /// into the tree.
    pub fn validate_document(
        &self,
        schema: &CompiledSchema,
        doc: &mut Document,
        materialize_defaults: bool,
    ) -> LibXml2Result<Vec<Diagnostic>> {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let code = {
            let ctxt = ValidContext::new(schema)?;
            unsafe {
                if materialize_defaults {
                    xmlSchemaSetValidOptions(ctxt.ptr.as_ptr(), XML_SCHEMA_VAL_VC_I_CREATE);
                }
                xmlSchemaSetValidStructuredErrors(
                    ctxt.ptr.as_ptr(),
                    Some(structured_error_callback),
                    &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
                );
                xmlSchemaValidateDoc(ctxt.ptr.as_ptr(), doc.as_ptr())
            }
        };

        if code < 0 {
            return Err(LibXml2Error::ValidationInternal {
                code,
                details: summarize(&diagnostics, "validation did not complete"),
            });
        }

        if code > 0 && !diagnostics.iter().any(|d| d.is_validity() && d.is_error()) {
            diagnostics.push(Diagnostic {
                domain: XML_FROM_SCHEMASV,
                severity: Some(Severity::Error),
                line: None,
                message: format!("Document is not valid (libxml2 code {})", code),
            });
        }

        Ok(diagnostics)
    }

    /// Validate a byte stream through the pull reader, forwarding each event
    ///
    /// A well-formedness error that stops the reader is returned as an error; everything
    /// else, including recoverable parser errors, comes back in [`StreamRun::diagnostics`].
    ///
    /// The reader must not get a structured handler of its own: with a schema plugged into
    /// its SAX chain, libxml2 2.9 passes that handler the plug instead of the parser context
    /// and crashes on the first parser error. Its diagnostics go to the thread-wide capture.
    pub fn stream_events(
        &self,
        schema: &CompiledSchema,
        xml: &[u8],
        options: c_int,
        handler: &mut dyn EventHandler,
    ) -> LibXml2Result<StreamRun> {
        let mut delivered = 0;
        let capture = ErrorCapture::install();
        unsafe { xmlResetLastError() };

        let outcome = {
            let reader = TextReader::for_memory(xml, options)?;
            if unsafe { xmlTextReaderSetSchema(reader.raw(), schema.as_ptr()) } != 0 {
                return Err(LibXml2Error::ReaderSchemaRejected);
            }

            loop {
                match unsafe { xmlTextReaderRead(reader.raw()) } {
                    1 => {
                        for event in reader.current_events() {
                            handler.handle(event);
                            delivered += 1;
                        }
                    }
                    0 => break Ok(()),
                    code => {
                        let last_error = unsafe { xmlGetLastError().as_ref() }
                            .map(Diagnostic::from_raw)
                            .filter(Diagnostic::is_error);
                        break Err((code, last_error));
                    }
                }
            }
        };

        let diagnostics = capture.finish();

        if let Err((code, last_error)) = outcome {
            let malformed = diagnostics
                .iter()
                .chain(&last_error)
                .any(|d| d.is_error() && d.is_wellformedness());
            let details = if diagnostics.iter().any(Diagnostic::is_error) {
                summarize(&diagnostics, "")
            } else {
                last_error.map_or_else(|| "the reader stopped".to_string(), |d| d.to_string())
            };
            return Err(if malformed {
                LibXml2Error::DocumentParseFailed { details }
            } else {
                LibXml2Error::ValidationInternal { code, details }
            });
        }

        Ok(StreamRun {
            diagnostics,
            delivered,
        })
    }

    /// Deep copy of a document
    pub fn copy_document(&self, doc: &Document) -> LibXml2Result<Document> {
        let copy = unsafe { xmlCopyDoc(doc.as_ptr(), 1) };
        NonNull::new(copy)
            .map(|ptr| unsafe { Document::from_raw(ptr) })
            .ok_or(LibXml2Error::DocumentCopyFailed)
    }

    /// Serialize a document as UTF-8, with an XML declaration
    pub fn serialize(&self, doc: &Document, indent: bool) -> LibXml2Result<Vec<u8>> {
        let mut mem: *mut c_char = ptr::null_mut();
        let mut size: c_int = 0;

        unsafe {
            xmlDocDumpFormatMemoryEnc(
                doc.as_ptr(),
                &mut mem,
                &mut size,
                c"UTF-8".as_ptr(),
                c_int::from(indent),
            );

            if mem.is_null() {
                return Err(LibXml2Error::SerializationFailed);
            }

            let bytes = usize::try_from(size)
                .map(|len| std::slice::from_raw_parts(mem as *const u8, len).to_vec());
            free_xml(mem as *mut c_void);
            bytes.map_err(|_| LibXml2Error::SerializationFailed)
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    const VALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root>Hello World</root>"#;

    const INVALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root><invalid>content</invalid></root>"#;

    #[test]
    fn test_libxml2_wrapper_creation() {
        let wrapper = LibXml2Wrapper::new();
        drop(wrapper);
    }

    #[test]
    fn test_schema_parsing_success() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.compile_schema(SIMPLE_XSD.as_bytes(), None);
        assert!(result.is_ok());
    }

    #[test]
    fn test_schema_parsing_invalid_schema() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.compile_schema(b"<invalid>not a schema</invalid>", None);

        match result.unwrap_err() {
            LibXml2Error::SchemaParseFailed { details } => assert!(!details.is_empty()),
            other => panic!("Expected SchemaParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_parsing_empty_data() {
        let wrapper = LibXml2Wrapper::new();
        assert!(wrapper.compile_schema(&[], None).is_err());
    }

    #[test]
    fn test_parse_document_malformed() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.parse_document(b"<root><open></root>", 0);

        match result.unwrap_err() {
            LibXml2Error::DocumentParseFailed { details } => assert!(details.contains("line")),
            other => panic!("Expected DocumentParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_document_unbound_prefix() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.parse_document(b"<p:root/>", 0);
        assert!(matches!(
            result,
            Err(LibXml2Error::DocumentParseFailed { .. })
        ));
    }

    #[test]
    fn test_validate_document_reports_diagnostics() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(SIMPLE_XSD.as_bytes(), None).unwrap();

        let mut valid = wrapper.parse_document(VALID_XML.as_bytes(), 0).unwrap();
        let diagnostics = wrapper.validate_document(&schema, &mut valid, true).unwrap();
        assert!(!diagnostics.iter().any(Diagnostic::is_error));

        let mut invalid = wrapper.parse_document(INVALID_XML.as_bytes(), 0).unwrap();
        let diagnostics = wrapper
            .validate_document(&schema, &mut invalid, true)
            .unwrap();
        assert!(diagnostics.iter().any(|d| d.is_validity() && d.is_error()));
    }

    #[test]
    fn test_stream_events_delivers_events() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(SIMPLE_XSD.as_bytes(), None).unwrap();

        let mut events: Vec<XmlEvent> = Vec::new();
        let run = wrapper
            .stream_events(&schema, VALID_XML.as_bytes(), 0, &mut events)
            .unwrap();

        assert_eq!(run.delivered, events.len());
        assert!(matches!(events.first(), Some(XmlEvent::StartElement { .. })));
        assert!(matches!(events.last(), Some(XmlEvent::EndElement { .. })));
        assert!(!run.diagnostics.iter().any(Diagnostic::is_error));
    }

    #[test]
    fn test_stream_events_malformed_input() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(SIMPLE_XSD.as_bytes(), None).unwrap();

        let mut events: Vec<XmlEvent> = Vec::new();
        let result = wrapper.stream_events(&schema, b"<root>unterminated", 0, &mut events);
        match result.unwrap_err() {
            LibXml2Error::DocumentParseFailed { details } => assert!(!details.is_empty()),
            other => panic!("Expected DocumentParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_events_unclosed_child_with_namespace() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(SIMPLE_XSD.as_bytes(), None).unwrap();

        let mut events: Vec<XmlEvent> = Vec::new();
        let result = wrapper.stream_events(
            &schema,
            b"<root xmlns=\"urn:example:other\"><child>",
            0,
            &mut events,
        );
        assert!(matches!(
            result,
            Err(LibXml2Error::DocumentParseFailed { .. })
        ));

        // The thread's error channel is usable again afterwards
        let run = wrapper
            .stream_events(&schema, VALID_XML.as_bytes(), 0, &mut events)
            .unwrap();
        assert!(!run.diagnostics.iter().any(Diagnostic::is_error));
    }

    #[test]
    fn test_compile_failure_names_missing_include() {
        let wrapper = LibXml2Wrapper::new();
        let xsd = br#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:include schemaLocation="DoesNotExist.xsd"/>
</xs:schema>"#;

        match wrapper.compile_schema(xsd, None).unwrap_err() {
            LibXml2Error::SchemaParseFailed { details } => {
                assert!(details.contains("DoesNotExist.xsd"), "{}", details)
            }
            other => panic!("Expected SchemaParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_document_keeps_first_error() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.parse_document(b"<p:root xmlns:q=\"relative\"/>", 0);

        match result.unwrap_err() {
            LibXml2Error::DocumentParseFailed { details } => {
                assert!(details.contains("prefix p"), "{}", details)
            }
            other => panic!("Expected DocumentParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_error_capture_restores_previous_handler() {
        let outer = ErrorCapture::install();
        {
            let inner = ErrorCapture::install();
            assert_eq!(unsafe { *__xmlStructuredErrorContext() }, inner.user_data());
        }
        assert_eq!(unsafe { *__xmlStructuredErrorContext() }, outer.user_data());
        drop(outer);

        let wrapper = LibXml2Wrapper::new();
        assert!(wrapper.parse_document(b"<root><open></root>", 0).is_err());
        assert!(unsafe { *__xmlStructuredErrorContext() }.is_null());
    }

    #[test]
    fn test_serialize_round_trip() {
        let wrapper = LibXml2Wrapper::new();
        let doc = wrapper.parse_document(VALID_XML.as_bytes(), 0).unwrap();

        let bytes = wrapper.serialize(&doc, false).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("<root>Hello World</root>"));
    }

    #[test]
    fn test_copy_document_is_independent() {
        let wrapper = LibXml2Wrapper::new();
        let doc = wrapper.parse_document(VALID_XML.as_bytes(), 0).unwrap();
        let copy = wrapper.copy_document(&doc).unwrap();

        assert_ne!(doc.as_ptr(), copy.as_ptr());
        drop(doc);
        assert_eq!(copy.root_element().unwrap().name(), "root");
    }

    #[test]
    fn test_buffer_len() {
        assert_eq!(buffer_len(b"abc").unwrap(), 3);
    }

    #[test]
    fn test_summarize_skips_warnings() {
        let diagnostics = vec![
            Diagnostic {
                domain: XML_FROM_SCHEMASP,
                severity: Some(Severity::Warning),
                line: None,
                message: "ignored".to_string(),
            },
            Diagnostic {
                domain: XML_FROM_SCHEMASP,
                severity: Some(Severity::Error),
                line: Some(4),
                message: "broken".to_string(),
            },
        ];

        assert_eq!(summarize(&diagnostics, "fallback"), "line 4: broken");
        assert_eq!(summarize(&diagnostics[..1], "fallback"), "fallback");
    }
}
