use std::fs;
use std::io;
use std::path::Path;

/// Collaborator that turns a path into shader source text.
pub trait SourceReader {
    fn read_source(&self, path: &Path) -> io::Result<String>;
}

/// Reads shader sources straight from the filesystem.
#[derive(Debug, Default, Copy, Clone)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read_source(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

impl<F> SourceReader for F
where
    F: Fn(&Path) -> io::Result<String>,
{
    fn read_source(&self, path: &Path) -> io::Result<String> {
        self(path)
    }
}
