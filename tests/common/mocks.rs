use std::sync::Mutex;

use mockall::mock;
use xsd_dom::{EventHandler, ResourceRequest, SchemaResolver, XmlEvent};

// Mock resolver for asserting how schema references are requested
mock! {
    pub Resolver {}

    impl SchemaResolver for Resolver {
        fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>>;
    }
}

/// Resolver that answers from a fixed table and logs every request it sees
pub struct RecordingResolver {
    schemas: Vec<(String, Vec<u8>)>,
    request_log: Mutex<Vec<ResourceRequest>>,
}

impl RecordingResolver {
    pub fn new() -> Self {
        Self {
            schemas: Vec::new(),
            request_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_schema(mut self, file_name: &str, xsd: Vec<u8>) -> Self {
        self.schemas.push((file_name.to_string(), xsd));
        self
    }

    pub fn requests(&self) -> Vec<ResourceRequest> {
        self.request_log.lock().unwrap().clone()
    }
}

impl SchemaResolver for RecordingResolver {
    fn resolve(&self, request: &ResourceRequest) -> Option<Vec<u8>> {
        self.request_log.lock().unwrap().push(request.clone());
        self.schemas
            .iter()
            .find(|(name, _)| name == request.file_name())
            .map(|(_, xsd)| xsd.clone())
    }
}

/// Event handler keeping only element names, in order
#[derive(Default)]
pub struct ElementLog {
    pub started: Vec<String>,
    pub ended: Vec<String>,
}

impl EventHandler for ElementLog {
    fn handle(&mut self, event: XmlEvent) {
        match event {
            XmlEvent::StartElement { name, .. } => self.started.push(name.local_name),
            XmlEvent::EndElement { name } => self.ended.push(name.local_name),
            _ => {}
        }
    }
}
