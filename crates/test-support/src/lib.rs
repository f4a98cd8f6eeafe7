pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use minidom::Element;
    use thiserror::Error;
    use waddle_xmpp::{PipelineError, stanza};

    #[derive(Debug, Error)]
    pub enum FixtureError {
        #[error("failed to read fixture {path}: {source}")]
        Io {
            path: String,
            #[source]
            source: io::Error,
        },
        #[error("fixture {path} is not a stanza: {source}")]
        Parse {
            path: String,
            #[source]
            source: PipelineError,
        },
    }

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> Result<String, FixtureError> {
        let relative = relative.as_ref();
        fs::read_to_string(path(relative)).map_err(|source| FixtureError::Io {
            path: relative.to_string_lossy().into_owned(),
            source,
        })
    }

    /// Raw text of `stanzas/<name>`, trimmed.
    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
            .trim()
            .to_string()
    }

    /// `stanzas/<name>` with every `{id}` placeholder replaced.
    pub fn stanza_with_id(name: &str, id: &str) -> String {
        stanza(name).replace("{id}", id)
    }

    pub fn try_element(name: &str) -> Result<Element, FixtureError> {
        let relative = Path::new("stanzas").join(name);
        let raw = read(&relative)?;
        stanza::parse_frame(raw.as_bytes()).map_err(|source| FixtureError::Parse {
            path: relative.to_string_lossy().into_owned(),
            source,
        })
    }

    pub fn element(name: &str) -> Element {
        try_element(name).unwrap_or_else(|error| panic!("{error}"))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        read(relative).unwrap_or_else(|error| panic!("{error}"))
    }
}

pub mod transport;

pub use transport::{Script, ScriptedTransport, test_lock};
