use std::cell::RefCell;
use std::fs;
use std::io::{self, Read};
use steinmetz_convert::{fetch_all, FetchError, Resource, Retrieve};

const RESOURCES: [Resource; 3] = [
    Resource {
        url: "https://example.org/a",
        file_name: "part0.npz",
    },
    Resource {
        url: "https://example.org/b",
        file_name: "part1.npz",
    },
    Resource {
        url: "https://example.org/c",
        file_name: "part2.npz",
    },
];

/// Serves the URL itself as the body, failing for URLs in `failing`.
#[derive(Default)]
struct FakeRetriever {
    requested: RefCell<Vec<String>>,
    failing: Vec<&'static str>,
}

impl Retrieve for FakeRetriever {
    fn open(&self, url: &str) -> Result<Box<dyn Read>, Box<dyn std::error::Error + Send + Sync>> {
        self.requested.borrow_mut().push(url.to_owned());
        if self.failing.iter().any(|&failing| failing == url) {
            return Err(Box::new(io::Error::new(io::ErrorKind::Other, "404 Not Found")));
        }
        Ok(Box::new(io::Cursor::new(url.as_bytes().to_vec())))
    }
}

#[test]
fn download_missing_files_once() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("raw");

    let retriever = FakeRetriever::default();
    let summary = fetch_all(&RESOURCES, &dest, &retriever).unwrap();
    assert_eq!(summary.downloaded.len(), 3);
    assert!(summary.skipped.is_empty());
    assert_eq!(
        fs::read_to_string(dest.join("part1.npz")).unwrap(),
        "https://example.org/b"
    );

    let again = FakeRetriever::default();
    let summary = fetch_all(&RESOURCES, &dest, &again).unwrap();
    assert!(summary.downloaded.is_empty());
    assert_eq!(summary.skipped.len(), 3);
    assert!(again.requested.borrow().is_empty());
}

#[test]
fn existing_files_are_not_replaced() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("part0.npz"), b"partial").unwrap();

    let retriever = FakeRetriever::default();
    let summary = fetch_all(&RESOURCES, dir.path(), &retriever).unwrap();
    assert_eq!(summary.skipped, vec![dir.path().join("part0.npz")]);
    assert_eq!(
        *retriever.requested.borrow(),
        vec!["https://example.org/b", "https://example.org/c"]
    );
    assert_eq!(fs::read(dir.path().join("part0.npz")).unwrap(), b"partial");
}

#[test]
fn failure_aborts_and_keeps_earlier_files() {
    let dir = tempfile::tempdir().unwrap();
    let retriever = FakeRetriever {
        failing: vec!["https://example.org/b"],
        ..Default::default()
    };
    match fetch_all(&RESOURCES, dir.path(), &retriever) {
        Err(FetchError::Retrieve { url, .. }) => assert_eq!(url, "https://example.org/b"),
        other => panic!("expected a retrieval error, got {:?}", other),
    }
    assert!(dir.path().join("part0.npz").exists());
    assert!(!dir.path().join("part1.npz").exists());
    assert!(!dir.path().join("part2.npz").exists());
    assert_eq!(retriever.requested.borrow().len(), 2);
}
