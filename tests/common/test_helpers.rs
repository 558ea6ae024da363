use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use xsd_dom::{DirectoryResolver, Document, Node};

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn xsd_dir(&self) -> PathBuf {
        self.fixtures_dir.join("xsd")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.fixtures_dir.join("configs")
    }

    pub fn read(&self, name: &str) -> Vec<u8> {
        let path = self.xsd_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("missing fixture {}: {}", path.display(), e))
    }

    /// Person.xsd, which includes Common.xsd
    pub fn person_xsd(&self) -> Vec<u8> {
        self.read("Person.xsd")
    }

    pub fn common_xsd(&self) -> Vec<u8> {
        self.read("Common.xsd")
    }

    pub fn people_xml(&self) -> Vec<u8> {
        self.read("People.xml")
    }

    pub fn missing_name_xml(&self) -> Vec<u8> {
        self.read("PeopleMissingName.xml")
    }

    pub fn two_violations_xml(&self) -> Vec<u8> {
        self.read("PeopleTwoViolations.xml")
    }

    pub fn unresolved_xsd(&self) -> Vec<u8> {
        self.read("Unresolved.xsd")
    }

    /// Resolver over the fixture schema directory
    pub fn resolver(&self) -> DirectoryResolver {
        DirectoryResolver::new(self.xsd_dir())
    }
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy the fixture schemas into a fresh temporary directory
pub fn copy_schemas_to_temp() -> std::io::Result<TempDir> {
    let temp_dir = TempDir::new()?;
    let fixtures = TestFixtures::new();

    for name in ["Person.xsd", "Common.xsd"] {
        fs::copy(fixtures.xsd_dir().join(name), temp_dir.path().join(name))?;
    }

    Ok(temp_dir)
}

/// File system test utilities
pub fn create_test_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// The `Person` elements of a people document
pub fn persons(doc: &Document) -> Vec<Node<'_>> {
    doc.root_element()
        .map(|root| {
            root.children()
                .into_iter()
                .filter(|child| child.name() == "Person")
                .collect()
        })
        .unwrap_or_default()
}

/// How many attributes of `node` carry the local name `name`
pub fn attribute_count(node: &Node<'_>, name: &str) -> usize {
    node.attributes()
        .iter()
        .filter(|attr| attr.name.local_name == name)
        .count()
}

/// Schema content constants for testing
pub const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

pub const VALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root>Hello World</root>"#;

pub const INVALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root><invalid>content</invalid></root>"#;

pub const MALFORMED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root><unclosed></root>"#;
