//! Definition → usage collection across a file set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use super::calls::{CallSiteResolver, DefinitionIndex};
use super::definitions::DefinitionExtractor;
use super::facts::{CallSite, MethodDefinition};
use super::imports::ImportResolver;
use super::parse::{ParseFailure, ParsedFile, PythonParser};
use super::sampler::UsageSampler;

/// One definition with its sampled call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodUsage {
    pub definition: MethodDefinition,
    pub call_sites: Vec<CallSite>,
}

/// Result of collecting usages over a file set.
#[derive(Debug, Clone, Default)]
pub struct UsageMap {
    /// Definitions in discovery order (walk order, then source order).
    pub usages: Vec<MethodUsage>,
    /// Files left out because they failed to read or parse.
    pub failures: Vec<ParseFailure>,
    /// Number of files parsed successfully.
    pub files_parsed: usize,
}

impl UsageMap {
    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodUsage> {
        self.usages.iter()
    }

    /// First definition with the given qualified name, optionally restricted to a file.
    pub fn find(&self, qualified_name: &str, file: Option<&Path>) -> Option<&MethodUsage> {
        self.usages.iter().find(|u| {
            u.definition.qualified_name() == qualified_name
                && file.map_or(true, |f| u.definition.file == f)
        })
    }

    /// Total call sites kept after sampling.
    pub fn call_site_count(&self) -> usize {
        self.usages.iter().map(|u| u.call_sites.len()).sum()
    }
}

/// Parses a file set and maps every definition to its sampled usages.
pub struct UsageCollector {
    parser: PythonParser,
    extractor: DefinitionExtractor,
    imports: ImportResolver,
    calls: CallSiteResolver,
    sampler: UsageSampler,
}

impl UsageCollector {
    pub fn new(sampler: UsageSampler) -> anyhow::Result<Self> {
        let parser = PythonParser::new();
        let extractor = DefinitionExtractor::new(&parser)?;
        let imports = ImportResolver::new(&parser)?;
        let calls = CallSiteResolver::new(&parser)?;
        Ok(Self {
            parser,
            extractor,
            imports,
            calls,
            sampler,
        })
    }

    /// Collect definitions and usages.
    ///
    /// `files` is searched for call sites. With a `target`, only definitions
    /// from that file are kept; the target is parsed even if `files` does not
    /// list it.
    pub fn collect(&self, root: &Path, files: &[PathBuf], target: Option<&Path>) -> UsageMap {
        let mut files = files.to_vec();
        if let Some(target) = target {
            if !files.iter().any(|f| f == target) {
                files.push(target.to_path_buf());
            }
        }

        let results: Vec<_> = files
            .par_iter()
            .map(|path| self.parser.parse_file(root, path))
            .collect();

        let mut parsed: Vec<ParsedFile> = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (path, result) in files.iter().zip(results) {
            match result {
                Ok(file) => parsed.push(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable file");
                    failures.push(ParseFailure {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let definitions: Vec<MethodDefinition> = parsed
            .iter()
            .filter(|p| target.map_or(true, |t| p.path() == t))
            .flat_map(|p| self.extractor.extract(p))
            .collect();
        let index = DefinitionIndex::new(definitions);

        let per_file: Vec<Vec<(usize, CallSite)>> = parsed
            .par_iter()
            .map(|p| {
                let imports = self.imports.resolve_file(p);
                self.calls.resolve_file(p, &imports, &index)
            })
            .collect();

        let mut sites: HashMap<usize, Vec<CallSite>> = HashMap::new();
        for (definition, site) in per_file.into_iter().flatten() {
            sites.entry(definition).or_default().push(site);
        }

        let usages: Vec<MethodUsage> = index
            .definitions()
            .iter()
            .enumerate()
            .map(|(i, definition)| MethodUsage {
                definition: definition.clone(),
                call_sites: self.sampler.sample(sites.remove(&i).unwrap_or_default()),
            })
            .collect();

        debug!(
            files = parsed.len(),
            failures = failures.len(),
            definitions = usages.len(),
            "collected usages"
        );

        UsageMap {
            usages,
            failures,
            files_parsed: parsed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::facts::MatchConfidence;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_foo_called_from_bar() {
        let temp = TempDir::new().unwrap();
        let a = write(temp.path(), "a.py", "def foo():\n    return 1\n");
        let b = write(
            temp.path(),
            "b.py",
            "from a import foo\n\ndef bar():\n    return foo()\n",
        );

        let collector = UsageCollector::new(UsageSampler::default()).unwrap();
        let map = collector.collect(temp.path(), &[a.clone(), b.clone()], None);

        assert_eq!(map.len(), 2);
        let foo = map.find("foo", None).unwrap();
        assert_eq!(foo.definition.file, a);
        assert_eq!(foo.call_sites.len(), 1);
        assert_eq!(foo.call_sites[0].enclosing.name(), "bar");
        assert_eq!(foo.call_sites[0].file, b);
        assert_eq!(foo.call_sites[0].confidence, MatchConfidence::Exact);

        assert!(map.find("bar", None).unwrap().call_sites.is_empty());
    }

    #[test]
    fn test_single_file_mode_keeps_target_definitions() {
        let temp = TempDir::new().unwrap();
        let a = write(temp.path(), "a.py", "def foo():\n    pass\n");
        let b = write(
            temp.path(),
            "b.py",
            "import a\n\ndef bar():\n    a.foo()\n\ndef baz():\n    bar()\n",
        );

        let collector = UsageCollector::new(UsageSampler::default()).unwrap();
        let map = collector.collect(temp.path(), &[a.clone(), b], Some(a.as_path()));

        assert_eq!(map.len(), 1);
        assert_eq!(map.usages[0].definition.name, "foo");
        assert_eq!(map.usages[0].call_sites.len(), 1);
    }

    #[test]
    fn test_parse_failure_recorded_and_skipped() {
        let temp = TempDir::new().unwrap();
        let good = write(temp.path(), "good.py", "def ok():\n    pass\n");
        let bad = write(temp.path(), "bad.py", "def broken(:\n");

        let collector = UsageCollector::new(UsageSampler::default()).unwrap();
        let map = collector.collect(temp.path(), &[bad.clone(), good], None);

        assert_eq!(map.len(), 1);
        assert_eq!(map.files_parsed, 1);
        assert_eq!(map.failures.len(), 1);
        assert_eq!(map.failures[0].path, bad);
    }

    #[test]
    fn test_usages_are_sampled() {
        let temp = TempDir::new().unwrap();
        let mut body = String::from("def target():\n    pass\n\ndef caller():\n");
        for _ in 0..15 {
            body.push_str("    target()\n");
        }
        let path = write(temp.path(), "m.py", &body);

        let collector = UsageCollector::new(UsageSampler::new(10).with_seed(7)).unwrap();
        let map = collector.collect(temp.path(), &[path], None);

        assert_eq!(map.find("target", None).unwrap().call_sites.len(), 10);
        assert_eq!(map.call_site_count(), 10);
    }
}
