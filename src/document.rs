//! Namespace-aware document tree
//!
//! [`Document`] owns a libxml2 tree and frees it on drop. [`Node`] is a borrowed, read-only
//! view of one element inside it.

use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::libxml2::{
    self, LibXml2Wrapper, XML_ELEMENT_NODE, XmlDoc, XmlNode, XmlNs, borrow_xml_string,
    take_xml_string,
};

/// Expanded name of an element or attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub local_name: String,
    pub namespace: Option<String>,
    pub prefix: Option<String>,
}

impl QualifiedName {
    /// Unqualified name in no namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        QualifiedName {
            local_name: local_name.into(),
            namespace: None,
            prefix: None,
        }
    }

    /// The name as written in the document, `prefix:local` or `local`
    pub fn tag_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{{{}}}{}", namespace, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

/// A parsed XML document
pub struct Document {
    ptr: NonNull<XmlDoc>,
}

impl Document {
    /// Take ownership of a libxml2 document
    ///
    /// # Safety
    ///
    /// `ptr` must point to a document created by libxml2 that nothing else frees.
    pub(crate) unsafe fn from_raw(ptr: NonNull<XmlDoc>) -> Self {
        Document { ptr }
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr.as_ptr()
    }

    pub fn root_element(&self) -> Option<Node<'_>> {
        let root = unsafe { libxml2::xmlDocGetRootElement(self.ptr.as_ptr()) };
        NonNull::new(root).map(Node::new)
    }

    /// All elements whose tag name (`prefix:local` as written) equals `tag_name`, in
    /// document order; `"*"` matches every element
    pub fn elements_by_tag_name(&self, tag_name: &str) -> Vec<Node<'_>> {
        let mut found = Vec::new();
        if let Some(root) = self.root_element() {
            root.collect_by_tag_name(tag_name, &mut found);
        }
        found
    }

    /// Independent deep copy
    pub fn try_clone(&self) -> Result<Document> {
        Ok(LibXml2Wrapper::new().copy_document(self)?)
    }

    /// Serialize as UTF-8 text with an XML declaration
    pub fn to_xml_string(&self, indent: bool) -> Result<String> {
        let bytes = LibXml2Wrapper::new().serialize(self, indent)?;
        String::from_utf8(bytes).map_err(|e| {
            crate::error::XmlError::processing_with("Serialized document is not UTF-8", e)
        })
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        unsafe { libxml2::xmlFreeDoc(self.ptr.as_ptr()) };
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root_element().map(|root| root.qualified_name()))
            .finish()
    }
}

/// Read-only view of an element, valid while its document lives
#[derive(Clone, Copy)]
pub struct Node<'a> {
    ptr: NonNull<XmlNode>,
    _doc: PhantomData<&'a Document>,
}

impl<'a> Node<'a> {
    fn new(ptr: NonNull<XmlNode>) -> Self {
        Node {
            ptr,
            _doc: PhantomData,
        }
    }

    fn raw(&self) -> &'a XmlNode {
        unsafe { &*self.ptr.as_ptr() }
    }

    /// Local name
    pub fn name(&self) -> String {
        unsafe { borrow_xml_string(self.raw().name) }.unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<String> {
        namespace_uri(self.raw().ns)
    }

    pub fn prefix(&self) -> Option<String> {
        namespace_prefix(self.raw().ns)
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName {
            local_name: self.name(),
            namespace: self.namespace(),
            prefix: self.prefix(),
        }
    }

    /// Attribute value by name, regardless of its namespace
    pub fn attribute(&self, name: &str) -> Option<String> {
        let name = CString::new(name).ok()?;
        unsafe { take_xml_string(libxml2::xmlGetProp(self.ptr.as_ptr(), name.as_ptr())) }
    }

    /// Attribute value by local name and namespace URI
    pub fn attribute_ns(&self, local_name: &str, namespace: &str) -> Option<String> {
        let local_name = CString::new(local_name).ok()?;
        let namespace = CString::new(namespace).ok()?;
        unsafe {
            take_xml_string(libxml2::xmlGetNsProp(
                self.ptr.as_ptr(),
                local_name.as_ptr(),
                namespace.as_ptr(),
            ))
        }
    }

    /// Attributes in document order, namespace declarations excluded
    pub fn attributes(&self) -> Vec<Attribute> {
        let mut attributes = Vec::new();
        let mut current = self.raw().properties;

        while let Some(attr) = unsafe { current.as_ref() } {
            let name = QualifiedName {
                local_name: unsafe { borrow_xml_string(attr.name) }.unwrap_or_default(),
                namespace: namespace_uri(attr.ns),
                prefix: namespace_prefix(attr.ns),
            };
            let value = unsafe {
                take_xml_string(libxml2::xmlNodeListGetString(
                    self.raw().doc,
                    attr.children,
                    1,
                ))
            }
            .unwrap_or_default();
            attributes.push(Attribute { name, value });
            current = attr.next;
        }

        attributes
    }

    /// Concatenated text of this element and its descendants
    pub fn text(&self) -> String {
        unsafe { take_xml_string(libxml2::xmlNodeGetContent(self.ptr.as_ptr())) }
            .unwrap_or_default()
    }

    /// Line of the start tag in the parsed input
    pub fn line(&self) -> Option<u32> {
        let line = unsafe { libxml2::xmlGetLineNo(self.ptr.as_ptr()) };
        u32::try_from(line).ok().filter(|&line| line > 0)
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        NonNull::new(self.raw().parent)
            .filter(|parent| unsafe { parent.as_ref() }.node_type == XML_ELEMENT_NODE)
            .map(Node::new)
    }

    /// Child elements in document order
    pub fn children(&self) -> Vec<Node<'a>> {
        let mut children = Vec::new();
        let mut current = self.raw().children;

        while let Some(child) = NonNull::new(current) {
            let node = unsafe { child.as_ref() };
            if node.node_type == XML_ELEMENT_NODE {
                children.push(Node::new(child));
            }
            current = node.next;
        }

        children
    }

    /// First child element with the given local name
    pub fn child(&self, name: &str) -> Option<Node<'a>> {
        self.children().into_iter().find(|child| child.name() == name)
    }

    fn collect_by_tag_name(&self, tag_name: &str, found: &mut Vec<Node<'a>>) {
        if tag_name == "*" || self.qualified_name().tag_name() == tag_name {
            found.push(*self);
        }
        for child in self.children() {
            child.collect_by_tag_name(tag_name, found);
        }
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.qualified_name())
            .field("line", &self.line())
            .finish()
    }
}

fn namespace_uri(ns: *const XmlNs) -> Option<String> {
    unsafe { ns.as_ref() }.and_then(|ns| unsafe { borrow_xml_string(ns.href) })
}

fn namespace_prefix(ns: *const XmlNs) -> Option<String> {
    unsafe { ns.as_ref() }.and_then(|ns| unsafe { borrow_xml_string(ns.prefix) })
}
