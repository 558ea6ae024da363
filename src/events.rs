//! Event representation of a document
//!
//! The event family of the validator delivers the document as a sequence of [`XmlEvent`]s
//! to an [`EventHandler`] while libxml2's pull reader validates it.

use serde::{Deserialize, Serialize};

use crate::document::{Attribute, QualifiedName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XmlEvent {
    StartElement {
        name: QualifiedName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QualifiedName,
    },
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl XmlEvent {
    /// Local name for element events
    pub fn element_name(&self) -> Option<&str> {
        match self {
            XmlEvent::StartElement { name, .. } | XmlEvent::EndElement { name } => {
                Some(&name.local_name)
            }
            _ => None,
        }
    }
}

/// Receives the events of a validated document
pub trait EventHandler {
    fn handle(&mut self, event: XmlEvent);
}

impl EventHandler for Vec<XmlEvent> {
    fn handle(&mut self, event: XmlEvent) {
        self.push(event);
    }
}

/// Discards everything; used when an event source is validated without a sink
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl EventHandler for NullHandler {
    fn handle(&mut self, _event: XmlEvent) {}
}

/// Adapts a closure into an [`EventHandler`]
pub struct FnHandler<F>(pub F);

impl<F> EventHandler for FnHandler<F>
where
    F: FnMut(XmlEvent),
{
    fn handle(&mut self, event: XmlEvent) {
        (self.0)(event)
    }
}
