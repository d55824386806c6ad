//! Processing many documents at once, spread over a number of worker threads

use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use dhparse::{Frontend, Options, Report, Worker};
use dhparse_grammar::Error;
use walkdir::WalkDir;

use crate::config::BatchConfig;

/// Something which stopped a document (or the whole batch) from being processed
#[derive(Debug)]
pub enum BatchError {
    Io(PathBuf, std::io::Error),
    Walk(walkdir::Error),
    Spawn(std::io::Error),
}

pub type BatchResult<T> = Result<T, BatchError>;

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Io(path, e) => write!(f, "{}: {}", path.display(), e),
            BatchError::Walk(e) => write!(f, "can't search directory: {}", e),
            BatchError::Spawn(e) => write!(f, "can't start worker thread: {}", e),
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BatchError::Io(_, e) => Some(e),
            BatchError::Walk(e) => Some(e),
            BatchError::Spawn(e) => Some(e),
        }
    }
}

impl From<walkdir::Error> for BatchError {
    fn from(e: walkdir::Error) -> Self {
        BatchError::Walk(e)
    }
}

/// The worst problem found in a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Clean,
    Warnings,
    Errors,
}

/// The outcome of a whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub processed: usize,
    pub with_warnings: usize,
    pub with_errors: usize,
    /// Files which couldn't be read or written
    pub failed: usize,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.with_errors == 0 && self.failed == 0
    }

    fn add(&mut self, result: &BatchResult<Status>) {
        match result {
            Ok(status) => {
                self.processed += 1;
                match status {
                    Status::Clean => {}
                    Status::Warnings => self.with_warnings += 1,
                    Status::Errors => self.with_errors += 1,
                }
            }
            Err(_) => self.failed += 1,
        }
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} documents processed ({} with errors, {} with warnings), {} failed",
            self.processed, self.with_errors, self.with_warnings, self.failed
        )
    }
}

/* FINDING FILES */

/// Expands `paths` into a sorted list of files.  Directories are searched recursively for files
/// with one of the `extensions`, whereas files named explicitly are always included.
pub fn collect_files(paths: &[PathBuf], extensions: &[String]) -> BatchResult<Vec<PathBuf>> {
    let has_extension = |path: &Path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| extensions.iter().any(|e| e == ext))
    };

    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if entry.file_type().is_file() && has_extension(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/* PROCESSING */

/// Processes the document at `path` and writes everything it produces into `config.out_dir`:
/// - `<stem>.<ext>` with the output, unless a fatal error occurred
/// - `<stem>_ERRORS.txt` or `<stem>_WARNINGS.txt` with the errors, if there are any
/// - `<stem>.cst` and `<stem>.ast` with the syntax trees, in debug mode
pub fn process_file(
    frontend: &dyn Frontend,
    worker: &mut dyn Worker,
    path: &Path,
    config: &BatchConfig,
) -> BatchResult<Status> {
    let source = std::fs::read_to_string(path).map_err(|e| BatchError::Io(path.to_owned(), e))?;
    let serialization = config
        .serialization
        .unwrap_or_else(|| frontend.default_serialization());
    let options = Options {
        serialization,
        keep_trees: config.debug,
    };
    let report = worker.process(&source, &options);

    let stem = path
        .file_stem()
        .map_or_else(|| "out".to_owned(), |s| s.to_string_lossy().into_owned());
    let write = |file_name: String, contents: &str| {
        let out_path = config.out_dir.join(file_name);
        std::fs::write(&out_path, contents).map_err(|e| BatchError::Io(out_path, e))
    };

    if let Some(output) = &report.output {
        write(
            format!("{}.{}", stem, frontend.output_extension(serialization)),
            output,
        )?;
    }
    if let Some(cst) = &report.cst {
        write(format!("{}.cst", stem), cst)?;
    }
    if let Some(ast) = &report.ast {
        write(format!("{}.ast", stem), ast)?;
    }

    let status = status(&report);
    match status {
        Status::Clean => {}
        Status::Warnings => write(format!("{}_WARNINGS.txt", stem), &error_file(&report.errors))?,
        Status::Errors => write(format!("{}_ERRORS.txt", stem), &error_file(&report.errors))?,
    }
    log::info!(
        "Processed {} ({} errors)",
        path.display(),
        report.errors.len()
    );
    Ok(status)
}

fn status(report: &Report) -> Status {
    if report.has_errors() {
        Status::Errors
    } else if report.errors.is_empty() {
        Status::Clean
    } else {
        Status::Warnings
    }
}

fn error_file(errors: &[Error]) -> String {
    errors.iter().map(|e| format!("{}\n", e)).collect()
}

/// The stack size of each worker thread.  Parsing stops at `Config::max_stack_size`, and this
/// leaves plenty of room on top of that for transforming, compiling and serializing the trees.
pub const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Processes every file in `files` on `config.threads` threads, each with its own [`Worker`].
/// Documents which can't be read or written are logged and counted, but don't stop the batch.
pub fn batch_process(
    frontend: &dyn Frontend,
    files: &[PathBuf],
    config: &BatchConfig,
) -> BatchResult<Summary> {
    std::fs::create_dir_all(&config.out_dir)
        .map_err(|e| BatchError::Io(config.out_dir.clone(), e))?;

    let threads = config.threads.clamp(1, files.len().max(1));
    log::debug!("Processing {} files on {} threads", files.len(), threads);
    let next_file = AtomicUsize::new(0);
    let results = std::thread::scope(|scope| -> BatchResult<Vec<_>> {
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", i))
                .stack_size(WORKER_STACK_SIZE)
                .spawn_scoped(scope, || {
                    let mut worker = frontend.worker();
                    let mut results = Vec::new();
                    loop {
                        let idx = next_file.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = files.get(idx) else { break };
                        let result = process_file(frontend, worker.as_mut(), path, config);
                        if let Err(e) = &result {
                            log::warn!("{}", e);
                        }
                        results.push(result);
                    }
                    results
                })
                .map_err(BatchError::Spawn)?;
            handles.push(handle);
        }
        let results = handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect::<Vec<_>>();
        Ok(results)
    })?;

    let mut summary = Summary::default();
    for result in &results {
        summary.add(result);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use dhparse::json::JsonFrontend;
    use dhparse_grammar::{Config, Serialization};

    use super::*;

    fn frontend() -> JsonFrontend {
        JsonFrontend::new(Config::default()).unwrap()
    }

    fn config(out_dir: &Path) -> BatchConfig {
        BatchConfig {
            out_dir: out_dir.to_owned(),
            ..BatchConfig::default()
        }
    }

    #[test]
    fn finds_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.json"), "1").unwrap();
        fs::write(dir.path().join("nested/b.json"), "2").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let explicit = dir.path().join("notes.txt");
        let files = collect_files(
            &[dir.path().to_owned(), explicit.clone(), dir.path().join("a.json")],
            &["json".to_owned()],
        )
        .unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("a.json"),
                dir.path().join("nested/b.json"),
                explicit
            ]
        );
    }

    #[test]
    fn outputs_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        fs::write(&good, r#"{"a": [1, 2]}"#).unwrap();
        fs::write(&bad, "[1, 2").unwrap();

        let json = frontend();
        let summary = batch_process(&json, &[good, bad], &config(&out)).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.with_errors, 1);
        assert!(!summary.is_success());

        let output = fs::read_to_string(out.join("good.json")).unwrap();
        assert_eq!(output, "{\n  \"a\": [\n    1,\n    2\n  ]\n}");
        assert!(!out.join("good_ERRORS.txt").exists());
        // Errors aren't fatal, so the broken document still produces output
        assert!(out.join("bad.json").exists());
        let errors = fs::read_to_string(out.join("bad_ERRORS.txt")).unwrap();
        assert!(errors.starts_with("1:6: Error (1010): "), "{}", errors);
    }

    #[test]
    fn warnings_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("dup.json");
        fs::write(&doc, r#"{"a": 1, "a": 2}"#).unwrap();

        let json = frontend();
        let mut worker = json.worker();
        let status = process_file(&json, worker.as_mut(), &doc, &config(dir.path())).unwrap();
        assert_eq!(status, Status::Warnings);
        assert!(dir.path().join("dup_WARNINGS.txt").exists());
        assert!(!dir.path().join("dup_ERRORS.txt").exists());
    }

    #[test]
    fn debug_trees() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.json");
        fs::write(&doc, "[true]").unwrap();

        let json = frontend();
        let mut worker = json.worker();
        let config = BatchConfig {
            debug: true,
            serialization: Some(Serialization::Sxpr),
            ..config(&dir.path().join("out"))
        };
        fs::create_dir(&config.out_dir).unwrap();
        let status = process_file(&json, worker.as_mut(), &doc, &config).unwrap();
        assert_eq!(status, Status::Clean);
        let ast = fs::read_to_string(config.out_dir.join("doc.ast")).unwrap();
        assert_eq!(ast, r#"(array (bool "true"))"#);
        assert!(config.out_dir.join("doc.cst").exists());
    }

    #[test]
    fn unreadable_files_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let summary = batch_process(&frontend(), &[missing], &config(dir.path())).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 0);
    }

    #[test]
    fn deeply_nested_documents_fail_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("deep.json");
        fs::write(&deep, format!("{}{}", "[".repeat(20_000), "]".repeat(20_000))).unwrap();
        let shallow = dir.path().join("shallow.json");
        fs::write(&shallow, format!("{}{}", "[".repeat(20), "]".repeat(20))).unwrap();

        let config = config(&dir.path().join("out"));
        let summary = batch_process(&frontend(), &[deep, shallow], &config).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.with_errors, 1);
        let errors = fs::read_to_string(config.out_dir.join("deep_ERRORS.txt")).unwrap();
        assert!(errors.contains("(10020)"), "{}", errors);
    }

    #[test]
    fn many_threads() {
        let dir = tempfile::tempdir().unwrap();
        let files = (0..20)
            .map(|i| {
                let path = dir.path().join(format!("doc{}.json", i));
                fs::write(&path, format!("[{}]", i)).unwrap();
                path
            })
            .collect::<Vec<_>>();
        let config = BatchConfig {
            threads: 4,
            ..config(&dir.path().join("out"))
        };

        let summary = batch_process(&frontend(), &files, &config).unwrap();
        assert_eq!(summary.processed, 20);
        assert!(summary.is_success());
        for i in 0..20 {
            let output = fs::read_to_string(config.out_dir.join(format!("doc{}.json", i))).unwrap();
            assert_eq!(output, format!("[\n  {}\n]", i));
        }
    }
}
