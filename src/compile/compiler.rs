// Feature compiler
// Incremental, folder-at-a-time compilation of example folders into the
// training and testing datasets

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::folders::{folder_name, DirectoryListing, FsDirectoryListing};
use crate::audio::{AudioError, ExampleBuilder, WavExampleBuilder};
use crate::config::{validate_config, CompilerConfig, ConfigError, FeatureConfig};
use crate::spectrum::bands::{BandError, NoteRange};
use crate::spectrum::features::{FeatureGenerator, SpectrumFeatureBuilder};
use crate::spectrum::fft::SpectrumError;
use crate::state::{Dataset, DbError, FeatureRecord, FeatureStore, SqliteFeatureStore};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Cannot list category root {root}: {source}")]
    Configuration {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Category root {0} has no folder name")]
    InvalidRoot(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to read examples in {folder}: {source}")]
    Example {
        folder: String,
        #[source]
        source: AudioError,
    },

    #[error("Feature extraction failed: {0}")]
    Feature(#[from] SpectrumError),

    #[error("Invalid label: {0}")]
    Label(#[from] BandError),

    #[error("Failed to append {folder} to the {dataset} dataset: {source}")]
    Store {
        folder: String,
        dataset: Dataset,
        #[source]
        source: DbError,
    },

    #[error("Example in {folder} produced {found} features, expected {expected}")]
    FeatureLength {
        folder: String,
        expected: usize,
        found: usize,
    },

    #[error("No {dataset} dataset at {path}")]
    MissingDataset { dataset: Dataset, path: PathBuf },

    #[error("The {0} dataset was built with different feature settings; recompile with --overwrite")]
    FingerprintMismatch(Dataset),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Kinds of example folders, compiled in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Noise,
    Monophonic,
    Polyphonic,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Noise, Category::Monophonic, Category::Polyphonic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Noise => "noise",
            Category::Monophonic => "mono",
            Category::Polyphonic => "poly",
        }
    }
}

/// Names of every folder already present in either dataset.
/// Grows monotonically; a name in the set is never compiled again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedFolderSet {
    names: HashSet<String>,
}

impl ProcessedFolderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of the folder lists of `stores`
    pub fn from_stores(stores: &[&dyn FeatureStore]) -> Result<Self, DbError> {
        let mut set = Self::new();
        for store in stores {
            for name in store.folders()? {
                set.insert(name);
            }
        }
        Ok(set)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns false if the name was already present
    pub fn insert(&mut self, name: String) -> bool {
        self.names.insert(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Routes folders to a dataset by name: listed names go to testing
#[derive(Debug, Clone, Default)]
pub struct DatasetAssignment {
    testing: HashSet<String>,
}

impl DatasetAssignment {
    pub fn new<I, T>(testing_folders: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        DatasetAssignment {
            testing: testing_folders.into_iter().map(Into::into).collect(),
        }
    }

    pub fn assign(&self, folder: &str) -> Dataset {
        if self.testing.contains(folder) {
            Dataset::Testing
        } else {
            Dataset::Training
        }
    }
}

/// One example builder per category
pub struct ExampleBuilders {
    pub noise: Box<dyn ExampleBuilder>,
    pub mono: Box<dyn ExampleBuilder>,
    pub poly: Box<dyn ExampleBuilder>,
}

impl ExampleBuilders {
    /// WAV folder builders windowed per `features`
    pub fn wav(features: &FeatureConfig) -> Self {
        let windows = features.window_config();
        ExampleBuilders {
            noise: Box::new(WavExampleBuilder::noise(windows)),
            mono: Box::new(WavExampleBuilder::monophonic(windows)),
            poly: Box::new(WavExampleBuilder::polyphonic(windows)),
        }
    }

    fn for_category(&self, category: Category) -> &dyn ExampleBuilder {
        match category {
            Category::Noise => self.noise.as_ref(),
            Category::Monophonic => self.mono.as_ref(),
            Category::Polyphonic => self.poly.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderOutcome {
    Committed { dataset: Dataset, records: usize },
    Skipped,
}

/// Reported after each candidate folder of a category
#[derive(Debug, Clone, PartialEq)]
pub struct FolderProgress {
    pub category: Category,
    pub folder: String,
    pub outcome: FolderOutcome,
    /// Candidates of this category handled so far, including this one
    pub completed: usize,
    pub total: usize,
}

impl FolderProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileSummary {
    pub training_folders: Vec<String>,
    pub testing_folders: Vec<String>,
    pub skipped_folders: Vec<String>,
    /// Records appended across both datasets
    pub records: usize,
    /// Examples dropped for being shorter than one analysis window
    pub short_examples: usize,
}

impl CompileSummary {
    pub fn appended_folders(&self) -> usize {
        self.training_folders.len() + self.testing_folders.len()
    }

    fn merge(&mut self, other: CompileSummary) {
        self.training_folders.extend(other.training_folders);
        self.testing_folders.extend(other.testing_folders);
        self.skipped_folders.extend(other.skipped_folders);
        self.records += other.records;
        self.short_examples += other.short_examples;
    }
}

struct CategoryRoots {
    noise: PathBuf,
    mono: PathBuf,
    poly: PathBuf,
}

/// Compiles example folders into the training and testing datasets.
///
/// Each folder is all-or-nothing: its records are buffered, appended in one
/// call, and only then is the folder name recorded as processed. Re-running
/// after an interruption therefore only compiles folders that never finished.
pub struct FeatureCompiler<S: FeatureStore> {
    training: S,
    testing: S,
    processed: ProcessedFolderSet,
    assignment: DatasetAssignment,
    builders: ExampleBuilders,
    generator: Box<dyn FeatureGenerator>,
    listing: Box<dyn DirectoryListing>,
    roots: CategoryRoots,
    note_range: NoteRange,
}

impl FeatureCompiler<SqliteFeatureStore> {
    /// Open both datasets and wire up the WAV builders and spectrum features
    pub fn open(config: &CompilerConfig) -> CompileResult<Self> {
        validate_config(config)?;
        let fingerprint = config.fingerprint()?;

        let mut training = SqliteFeatureStore::open(&config.training_path, config.overwrite)?;
        let mut testing = SqliteFeatureStore::open(&config.testing_path, config.overwrite)?;

        if !training.check_fingerprint(&fingerprint)? {
            return Err(CompileError::FingerprintMismatch(Dataset::Training));
        }
        if !testing.check_fingerprint(&fingerprint)? {
            return Err(CompileError::FingerprintMismatch(Dataset::Testing));
        }

        let generator = SpectrumFeatureBuilder::new(&config.features)?;

        Self::new(
            config,
            training,
            testing,
            ExampleBuilders::wav(&config.features),
            Box::new(generator),
            Box::new(FsDirectoryListing),
        )
    }

    /// Open datasets that must already exist, for work on compiled data
    pub fn open_existing(config: &CompilerConfig) -> CompileResult<Self> {
        for (dataset, path) in [
            (Dataset::Training, &config.training_path),
            (Dataset::Testing, &config.testing_path),
        ] {
            if !path.is_file() {
                return Err(CompileError::MissingDataset {
                    dataset,
                    path: path.clone(),
                });
            }
        }

        let config = CompilerConfig {
            overwrite: false,
            ..config.clone()
        };
        Self::open(&config)
    }
}

impl<S: FeatureStore> FeatureCompiler<S> {
    pub fn new(
        config: &CompilerConfig,
        training: S,
        testing: S,
        builders: ExampleBuilders,
        generator: Box<dyn FeatureGenerator>,
        listing: Box<dyn DirectoryListing>,
    ) -> CompileResult<Self> {
        let processed = ProcessedFolderSet::from_stores(&[&training, &testing])?;
        log::info!("{} folders already compiled", processed.len());

        Ok(FeatureCompiler {
            training,
            testing,
            processed,
            assignment: DatasetAssignment::new(config.testing_folders.iter().cloned()),
            builders,
            generator,
            listing,
            roots: CategoryRoots {
                noise: config.noise_root.clone(),
                mono: config.mono_root.clone(),
                poly: config.poly_root.clone(),
            },
            note_range: config.features.note_range,
        })
    }

    pub fn processed(&self) -> &ProcessedFolderSet {
        &self.processed
    }

    pub fn assignment(&self) -> &DatasetAssignment {
        &self.assignment
    }

    pub fn training(&self) -> &S {
        &self.training
    }

    pub fn testing(&self) -> &S {
        &self.testing
    }

    pub fn into_stores(self) -> (S, S) {
        (self.training, self.testing)
    }

    /// Compile noise, then monophonic, then polyphonic folders
    pub fn compile_all(
        &mut self,
        on_progress: &mut dyn FnMut(&FolderProgress),
    ) -> CompileResult<CompileSummary> {
        let mut summary = CompileSummary::default();
        for category in Category::ALL {
            summary.merge(self.compile_category(category, on_progress)?);
        }

        log::info!(
            "Compiled {} folders ({} records), skipped {}",
            summary.appended_folders(),
            summary.records,
            summary.skipped_folders.len()
        );
        Ok(summary)
    }

    pub fn compile_category(
        &mut self,
        category: Category,
        on_progress: &mut dyn FnMut(&FolderProgress),
    ) -> CompileResult<CompileSummary> {
        let folders = self.candidate_folders(category)?;
        log::info!("{}: {} candidate folders", category.as_str(), folders.len());

        let mut summary = CompileSummary::default();
        let total = folders.len();

        for (index, folder) in folders.iter().enumerate() {
            let name = folder_name(folder).ok_or_else(|| CompileError::InvalidRoot(folder.clone()))?;

            let outcome = if self.processed.contains(&name) {
                log::debug!("Skipping {}, already compiled", name);
                summary.skipped_folders.push(name.clone());
                FolderOutcome::Skipped
            } else {
                let (dataset, records, short) = self.compile_folder(category, folder, &name)?;
                match dataset {
                    Dataset::Training => summary.training_folders.push(name.clone()),
                    Dataset::Testing => summary.testing_folders.push(name.clone()),
                }
                summary.records += records;
                summary.short_examples += short;
                FolderOutcome::Committed { dataset, records }
            };

            on_progress(&FolderProgress {
                category,
                folder: name,
                outcome,
                completed: index + 1,
                total,
            });
        }

        Ok(summary)
    }

    /// Shuffle training then testing, forwarding each store's progress
    pub fn shuffle(
        &mut self,
        chunk_size: usize,
        passes: usize,
        on_progress: &mut dyn FnMut(Dataset, f64),
    ) -> CompileResult<()> {
        self.training
            .shuffle(chunk_size, passes, &mut |p| on_progress(Dataset::Training, p))?;
        self.testing
            .shuffle(chunk_size, passes, &mut |p| on_progress(Dataset::Testing, p))?;
        Ok(())
    }

    fn candidate_folders(&self, category: Category) -> CompileResult<Vec<PathBuf>> {
        let root = match category {
            // The noise root itself is the only folder
            Category::Noise => {
                let root = &self.roots.noise;
                self.listing
                    .check_root(root)
                    .map_err(|source| CompileError::Configuration {
                        root: root.clone(),
                        source,
                    })?;
                return Ok(vec![root.clone()]);
            }
            Category::Monophonic => &self.roots.mono,
            Category::Polyphonic => &self.roots.poly,
        };

        self.listing
            .list_dirs(root)
            .map_err(|source| CompileError::Configuration {
                root: root.clone(),
                source,
            })
    }

    /// Build, append, then mark one folder.
    /// Returns the dataset used, records appended and short examples dropped.
    fn compile_folder(
        &mut self,
        category: Category,
        folder: &Path,
        name: &str,
    ) -> CompileResult<(Dataset, usize, usize)> {
        let (records, short) = collect_records(
            self.builders.for_category(category),
            self.generator.as_ref(),
            self.note_range,
            folder,
            name,
        )?;

        let dataset = self.assignment.assign(name);
        let store = match dataset {
            Dataset::Training => &mut self.training,
            Dataset::Testing => &mut self.testing,
        };

        store
            .append(&records, name)
            .map_err(|source| CompileError::Store {
                folder: name.to_string(),
                dataset,
                source,
            })?;
        self.processed.insert(name.to_string());

        log::info!(
            "{}: appended {} records from {} to {}",
            category.as_str(),
            records.len(),
            name,
            dataset
        );
        Ok((dataset, records.len(), short))
    }
}

/// Run every example of `folder` through the generator, buffering the records
fn collect_records(
    builder: &dyn ExampleBuilder,
    generator: &dyn FeatureGenerator,
    note_range: NoteRange,
    folder: &Path,
    name: &str,
) -> CompileResult<(Vec<FeatureRecord>, usize)> {
    let mut records = Vec::new();
    let mut short = 0;
    let mut failure: Option<CompileError> = None;
    let expected = generator.feature_len();

    builder
        .for_each_example(folder, &mut |example| {
            let features = match generator.generate(&example) {
                Ok(Some(features)) => features,
                Ok(None) => {
                    short += 1;
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    failure = Some(e.into());
                    return ControlFlow::Break(());
                }
            };

            if features.len() != expected {
                failure = Some(CompileError::FeatureLength {
                    folder: name.to_string(),
                    expected,
                    found: features.len(),
                });
                return ControlFlow::Break(());
            }

            match FeatureRecord::from_example(&example, note_range, features) {
                Ok(record) => {
                    records.push(record);
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    failure = Some(e.into());
                    ControlFlow::Break(())
                }
            }
        })
        .map_err(|source| CompileError::Example {
            folder: name.to_string(),
            source,
        })?;

    if let Some(e) = failure {
        return Err(e);
    }
    Ok((records, short))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioExample;
    use crate::spectrum::fft::SpectrumResult;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;

    // ---------- fakes ----------

    #[derive(Default)]
    struct FakeListing {
        roots: HashMap<PathBuf, Vec<PathBuf>>,
        missing: Vec<PathBuf>,
    }

    impl FakeListing {
        fn with(mut self, root: &str, names: &[&str]) -> Self {
            let root = PathBuf::from(root);
            let dirs = names.iter().map(|n| root.join(n)).collect();
            self.roots.insert(root, dirs);
            self
        }

        fn without(mut self, root: &str) -> Self {
            self.missing.push(PathBuf::from(root));
            self
        }
    }

    impl DirectoryListing for FakeListing {
        fn list_dirs(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
            self.roots
                .get(root)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such root"))
        }

        fn check_root(&self, root: &Path) -> io::Result<()> {
            if self.missing.iter().any(|m| m == root) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such root"));
            }
            Ok(())
        }
    }

    /// Emits `examples` examples of note 60 per folder and logs every visit
    #[derive(Clone)]
    struct FakeBuilder {
        examples: usize,
        failing: Vec<String>,
        visits: Rc<RefCell<Vec<String>>>,
        /// Examples handed to the visitor across all folders
        emitted: Rc<Cell<usize>>,
    }

    impl FakeBuilder {
        fn new(examples: usize) -> Self {
            FakeBuilder {
                examples,
                failing: Vec::new(),
                visits: Rc::new(RefCell::new(Vec::new())),
                emitted: Rc::new(Cell::new(0)),
            }
        }
    }

    impl ExampleBuilder for FakeBuilder {
        fn for_each_example(
            &self,
            folder: &Path,
            visit: &mut dyn FnMut(AudioExample) -> ControlFlow<()>,
        ) -> Result<(), AudioError> {
            let name = folder_name(folder).unwrap();
            self.visits.borrow_mut().push(name.clone());
            if self.failing.contains(&name) {
                return Err(AudioError::UnsupportedFormat(format!("corrupt file in {}", name)));
            }
            for i in 0..self.examples {
                self.emitted.set(self.emitted.get() + 1);
                let flow = visit(AudioExample {
                    // every third example is too short to analyse
                    samples: if i % 3 == 2 { vec![] } else { vec![0.5; 4] },
                    sample_rate: 44100,
                    notes: vec![60],
                    onset: i == 0,
                });
                if flow.is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    struct FakeGenerator;

    impl FeatureGenerator for FakeGenerator {
        fn feature_len(&self) -> usize {
            2
        }

        fn generate(&self, example: &AudioExample) -> SpectrumResult<Option<Vec<f32>>> {
            if example.samples.is_empty() {
                return Ok(None);
            }
            Ok(Some(vec![example.samples[0], example.notes.len() as f32]))
        }
    }

    /// Claims `claimed` features but returns `returned`, or fails outright
    struct MisbehavingGenerator {
        claimed: usize,
        returned: Option<usize>,
    }

    impl FeatureGenerator for MisbehavingGenerator {
        fn feature_len(&self) -> usize {
            self.claimed
        }

        fn generate(&self, _example: &AudioExample) -> SpectrumResult<Option<Vec<f32>>> {
            match self.returned {
                Some(len) => Ok(Some(vec![0.0; len])),
                None => Err(SpectrumError::InvalidParameters("fft failed".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        folders: Vec<String>,
        records: usize,
        append_calls: usize,
        fail_appends: bool,
        shuffles: usize,
    }

    impl MemoryStore {
        fn with_folders(names: &[&str]) -> Self {
            MemoryStore {
                folders: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl FeatureStore for MemoryStore {
        fn folders(&self) -> Result<Vec<String>, DbError> {
            Ok(self.folders.clone())
        }

        fn append(&mut self, records: &[FeatureRecord], folder: &str) -> Result<(), DbError> {
            self.append_calls += 1;
            if self.fail_appends {
                return Err(DbError::CorruptRecord("disk full".to_string()));
            }
            self.folders.push(folder.to_string());
            self.records += records.len();
            Ok(())
        }

        fn shuffle(
            &mut self,
            _chunk_size: usize,
            passes: usize,
            on_progress: &mut dyn FnMut(f64),
        ) -> Result<(), DbError> {
            self.shuffles += 1;
            for pass in 0..passes {
                on_progress((pass + 1) as f64 / passes as f64);
            }
            Ok(())
        }
    }

    // ---------- helpers ----------

    fn config() -> CompilerConfig {
        CompilerConfig {
            noise_root: PathBuf::from("/audio/Noise/"),
            mono_root: PathBuf::from("/audio/Mono"),
            poly_root: PathBuf::from("/audio/Poly"),
            ..CompilerConfig::default()
        }
    }

    fn builders(builder: &FakeBuilder) -> ExampleBuilders {
        ExampleBuilders {
            noise: Box::new(builder.clone()),
            mono: Box::new(builder.clone()),
            poly: Box::new(builder.clone()),
        }
    }

    fn build_compiler(
        training: MemoryStore,
        testing: MemoryStore,
        builder: &FakeBuilder,
        listing: FakeListing,
    ) -> FeatureCompiler<MemoryStore> {
        build_compiler_with(training, testing, builder, listing, Box::new(FakeGenerator))
    }

    fn build_compiler_with(
        training: MemoryStore,
        testing: MemoryStore,
        builder: &FakeBuilder,
        listing: FakeListing,
        generator: Box<dyn FeatureGenerator>,
    ) -> FeatureCompiler<MemoryStore> {
        FeatureCompiler::new(
            &config(),
            training,
            testing,
            builders(builder),
            generator,
            Box::new(listing),
        )
        .unwrap()
    }

    fn standard_listing() -> FakeListing {
        FakeListing::default()
            .with("/audio/Mono", &["VenturePiano1", "godow", "muss"])
            .with("/audio/Poly", &["chords1", "mozart"])
    }

    fn ignore(_: &FolderProgress) {}

    // ---------- tests ----------

    #[test]
    fn test_processed_set_is_union_of_stores() {
        let training = MemoryStore::with_folders(&["a", "b"]);
        let testing = MemoryStore::with_folders(&["b", "mozart"]);
        let set = ProcessedFolderSet::from_stores(&[&training, &testing]).unwrap();

        assert_eq!(set.len(), 3);
        assert!(set.contains("a"));
        assert!(set.contains("mozart"));
        assert!(!set.contains("godow"));
    }

    #[test]
    fn test_dataset_assignment() {
        let assignment = DatasetAssignment::new(CompilerConfig::default().testing_folders);
        assert_eq!(assignment.assign("mozart"), Dataset::Testing);
        assert_eq!(assignment.assign("godow"), Dataset::Testing);
        assert_eq!(assignment.assign("Mozart"), Dataset::Training);
        assert_eq!(assignment.assign("VenturePiano1"), Dataset::Training);
    }

    #[test]
    fn test_compile_all_routes_folders() {
        let builder = FakeBuilder::new(3);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            standard_listing(),
        );

        let summary = compiler.compile_all(&mut ignore).unwrap();

        assert_eq!(summary.training_folders, vec!["Noise", "VenturePiano1", "chords1"]);
        assert_eq!(summary.testing_folders, vec!["godow", "muss", "mozart"]);
        assert!(summary.skipped_folders.is_empty());
        // 3 examples per folder, one of them too short
        assert_eq!(summary.records, 12);
        assert_eq!(summary.short_examples, 6);

        assert_eq!(
            *builder.visits.borrow(),
            vec!["Noise", "VenturePiano1", "godow", "muss", "chords1", "mozart"]
        );
        assert_eq!(compiler.processed().len(), 6);

        let (training, testing) = compiler.into_stores();
        assert_eq!(training.folders, vec!["Noise", "VenturePiano1", "chords1"]);
        assert_eq!(testing.folders, vec!["godow", "muss", "mozart"]);
        assert_eq!(training.records, 6);
        assert_eq!(testing.records, 6);
    }

    #[test]
    fn test_second_run_appends_nothing() {
        let builder = FakeBuilder::new(2);
        let mut first = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            standard_listing(),
        );
        first.compile_all(&mut ignore).unwrap();
        let (mut training, mut testing) = first.into_stores();
        training.append_calls = 0;
        testing.append_calls = 0;
        builder.visits.borrow_mut().clear();

        let mut second = build_compiler(training, testing, &builder, standard_listing());
        let summary = second.compile_all(&mut ignore).unwrap();

        assert_eq!(summary.appended_folders(), 0);
        assert_eq!(summary.skipped_folders.len(), 6);
        assert!(builder.visits.borrow().is_empty());

        let (training, testing) = second.into_stores();
        assert_eq!(training.append_calls, 0);
        assert_eq!(testing.append_calls, 0);
    }

    #[test]
    fn test_committed_folder_is_skipped_without_store_interaction() {
        let builder = FakeBuilder::new(2);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::with_folders(&["godow"]),
            &builder,
            FakeListing::default().with("/audio/Mono", &["godow"]),
        );

        let mut progress = Vec::new();
        let summary = compiler
            .compile_category(Category::Monophonic, &mut |p| progress.push(p.clone()))
            .unwrap();

        assert_eq!(summary.skipped_folders, vec!["godow"]);
        assert!(builder.visits.borrow().is_empty());
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].outcome, FolderOutcome::Skipped);

        let (training, testing) = compiler.into_stores();
        assert_eq!(training.append_calls, 0);
        assert_eq!(testing.append_calls, 0);
    }

    #[test]
    fn test_testing_folder_after_many_training_folders() {
        let mut names: Vec<String> = (0..10).map(|i| format!("piano{:02}", i)).collect();
        names.push("zz_mozart".to_string());
        names.push("mozart".to_string());
        let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

        let builder = FakeBuilder::new(1);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Poly", &name_refs),
        );

        let summary = compiler.compile_category(Category::Polyphonic, &mut ignore).unwrap();
        assert_eq!(summary.training_folders.len(), 11);
        assert_eq!(summary.testing_folders, vec!["mozart"]);

        let (training, testing) = compiler.into_stores();
        assert!(!training.folders.contains(&"mozart".to_string()));
        assert_eq!(testing.folders, vec!["mozart"]);
    }

    #[test]
    fn test_empty_category_root() {
        let builder = FakeBuilder::new(2);
        let mut compiler = build_compiler(
            MemoryStore::with_folders(&["old"]),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Mono", &[]),
        );
        let before = compiler.processed().clone();

        let summary = compiler.compile_category(Category::Monophonic, &mut ignore).unwrap();

        assert_eq!(summary, CompileSummary::default());
        assert_eq!(*compiler.processed(), before);
        let (training, testing) = compiler.into_stores();
        assert_eq!(training.append_calls + testing.append_calls, 0);
    }

    #[test]
    fn test_missing_root_aborts() {
        let builder = FakeBuilder::new(2);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Mono", &["a"]),
        );

        let result = compiler.compile_all(&mut ignore);
        assert!(matches!(
            result,
            Err(CompileError::Configuration { ref root, .. }) if root == Path::new("/audio/Poly")
        ));
        // categories before the failure stay committed
        assert!(compiler.processed().contains("Noise"));
        assert!(compiler.processed().contains("a"));
    }

    #[test]
    fn test_missing_noise_root_aborts() {
        let builder = FakeBuilder::new(2);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            standard_listing().without("/audio/Noise/"),
        );

        let result = compiler.compile_all(&mut ignore);
        assert!(matches!(
            result,
            Err(CompileError::Configuration { ref root, .. }) if root == Path::new("/audio/Noise")
        ));
        assert!(builder.visits.borrow().is_empty());
        assert!(compiler.processed().is_empty());
        let (training, testing) = compiler.into_stores();
        assert_eq!(training.append_calls + testing.append_calls, 0);
    }

    #[test]
    fn test_wrong_feature_length_rejects_folder() {
        let builder = FakeBuilder::new(4);
        let mut compiler = build_compiler_with(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Mono", &["piano"]),
            Box::new(MisbehavingGenerator {
                claimed: 2,
                returned: Some(3),
            }),
        );

        let result = compiler.compile_category(Category::Monophonic, &mut ignore);
        assert!(matches!(
            result,
            Err(CompileError::FeatureLength { ref folder, expected: 2, found: 3 }) if folder == "piano"
        ));
        assert!(!compiler.processed().contains("piano"));
        // enumeration stops at the first bad example
        assert_eq!(builder.emitted.get(), 1);
        let (training, _) = compiler.into_stores();
        assert_eq!(training.append_calls, 0);
    }

    #[test]
    fn test_generator_failure_stops_enumeration() {
        let builder = FakeBuilder::new(5);
        let mut compiler = build_compiler_with(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Poly", &["chords"]),
            Box::new(MisbehavingGenerator {
                claimed: 2,
                returned: None,
            }),
        );

        let result = compiler.compile_category(Category::Polyphonic, &mut ignore);
        assert!(matches!(result, Err(CompileError::Feature(_))));
        assert_eq!(builder.emitted.get(), 1);
        assert!(!compiler.processed().contains("chords"));
    }

    #[test]
    fn test_failed_append_leaves_folder_unmarked() {
        let builder = FakeBuilder::new(2);
        let testing = MemoryStore {
            fail_appends: true,
            ..Default::default()
        };
        let mut compiler = build_compiler(
            MemoryStore::default(),
            testing,
            &builder,
            FakeListing::default().with("/audio/Mono", &["a", "muss", "b"]),
        );

        let result = compiler.compile_category(Category::Monophonic, &mut ignore);
        assert!(matches!(
            result,
            Err(CompileError::Store { ref folder, dataset: Dataset::Testing, .. }) if folder == "muss"
        ));
        assert!(compiler.processed().contains("a"));
        assert!(!compiler.processed().contains("muss"));
        assert!(!compiler.processed().contains("b"));

        // a later run with a healthy store retries the folder
        let (training, _) = compiler.into_stores();
        let mut retry = build_compiler(
            training,
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Mono", &["a", "muss", "b"]),
        );
        let summary = retry.compile_category(Category::Monophonic, &mut ignore).unwrap();
        assert_eq!(summary.skipped_folders, vec!["a"]);
        assert_eq!(summary.testing_folders, vec!["muss"]);
        assert_eq!(summary.training_folders, vec!["b"]);
    }

    #[test]
    fn test_example_failure_appends_nothing() {
        let mut builder = FakeBuilder::new(2);
        builder.failing.push("broken".to_string());
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default().with("/audio/Mono", &["broken"]),
        );

        let result = compiler.compile_category(Category::Monophonic, &mut ignore);
        assert!(matches!(result, Err(CompileError::Example { ref folder, .. }) if folder == "broken"));
        assert!(!compiler.processed().contains("broken"));
        let (training, _) = compiler.into_stores();
        assert_eq!(training.append_calls, 0);
    }

    #[test]
    fn test_name_collision_across_categories_is_skipped() {
        let builder = FakeBuilder::new(1);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default()
                .with("/audio/Mono", &["session1"])
                .with("/audio/Poly", &["session1", "session2"]),
        );

        let summary = compiler.compile_all(&mut ignore).unwrap();
        assert_eq!(summary.training_folders, vec!["Noise", "session1", "session2"]);
        assert_eq!(summary.skipped_folders, vec!["session1"]);
    }

    #[test]
    fn test_noise_folder_named_after_root() {
        let builder = FakeBuilder::new(1);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            FakeListing::default(),
        );

        let mut progress = Vec::new();
        compiler
            .compile_category(Category::Noise, &mut |p| progress.push(p.clone()))
            .unwrap();

        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].folder, "Noise");
        assert_eq!(progress[0].fraction(), 1.0);
        assert_eq!(
            progress[0].outcome,
            FolderOutcome::Committed { dataset: Dataset::Training, records: 1 }
        );
    }

    #[test]
    fn test_progress_counts_candidates() {
        let builder = FakeBuilder::new(1);
        let mut compiler = build_compiler(
            MemoryStore::with_folders(&["muss"]),
            MemoryStore::default(),
            &builder,
            standard_listing(),
        );

        let mut fractions = Vec::new();
        compiler
            .compile_category(Category::Monophonic, &mut |p| fractions.push(p.fraction()))
            .unwrap();
        assert_eq!(fractions, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    }

    #[test]
    fn test_shuffle_forwards_progress_per_dataset() {
        let builder = FakeBuilder::new(1);
        let mut compiler = build_compiler(
            MemoryStore::default(),
            MemoryStore::default(),
            &builder,
            standard_listing(),
        );

        let mut progress = Vec::new();
        compiler
            .shuffle(16, 2, &mut |dataset, p| progress.push((dataset, p)))
            .unwrap();

        assert_eq!(
            progress,
            vec![
                (Dataset::Training, 0.5),
                (Dataset::Training, 1.0),
                (Dataset::Testing, 0.5),
                (Dataset::Testing, 1.0),
            ]
        );
        let (training, testing) = compiler.into_stores();
        assert_eq!((training.shuffles, testing.shuffles), (1, 1));
    }

    #[test]
    fn test_wav_folders_into_sqlite_datasets() {
        use crate::audio::ingest::tests::write_wav;
        use crate::spectrum::bands::note_to_frequency;
        use std::fs;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let tone = |note: f64| -> Vec<f32> {
            let frequency = note_to_frequency(note) as f32;
            (0..4096)
                .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / 44100.0).sin() * 0.5)
                .collect()
        };

        for folder in ["Noise", "mono/piano1", "mono/muss", "poly/chords"] {
            fs::create_dir_all(root.join(folder)).unwrap();
        }
        write_wav(&root.join("Noise/hiss.wav"), &vec![0.01; 2048], 44100);
        write_wav(&root.join("mono/piano1/piano_60.wav"), &tone(60.0), 44100);
        write_wav(&root.join("mono/muss/muss_69.wav"), &tone(69.0), 44100);
        let chord: Vec<f32> = tone(60.0)
            .iter()
            .zip(tone(64.0))
            .zip(tone(67.0))
            .map(|((a, b), c)| (a + b + c) / 3.0)
            .collect();
        write_wav(&root.join("poly/chords/60-64-67.wav"), &chord, 44100);

        let mut config = CompilerConfig {
            noise_root: root.join("Noise"),
            mono_root: root.join("mono"),
            poly_root: root.join("poly"),
            training_path: root.join("training.db"),
            testing_path: root.join("testing.db"),
            ..CompilerConfig::default()
        };
        config.features.sample_count = 1024;
        config.features.step_size = 1024;

        let mut compiler = FeatureCompiler::open(&config).unwrap();
        let summary = compiler.compile_all(&mut ignore).unwrap();

        assert_eq!(summary.training_folders, vec!["Noise", "piano1", "chords"]);
        assert_eq!(summary.testing_folders, vec!["muss"]);
        assert_eq!(summary.records, 14);
        assert_eq!(compiler.training().record_count().unwrap(), 10);
        assert_eq!(compiler.testing().record_count().unwrap(), 4);
        assert_eq!(
            compiler.training().feature_length().unwrap(),
            Some(73 + crate::spectrum::features::SCALAR_FEATURE_COUNT)
        );
        drop(compiler);

        let mut again = FeatureCompiler::open(&config).unwrap();
        let summary = again.compile_all(&mut ignore).unwrap();
        assert_eq!(summary.appended_folders(), 0);
        assert_eq!(summary.skipped_folders.len(), 4);
        drop(again);

        config.features.band_size = 2.0;
        assert!(matches!(
            FeatureCompiler::open(&config),
            Err(CompileError::FingerprintMismatch(Dataset::Training))
        ));
    }

    fn disk_config(root: &Path) -> CompilerConfig {
        CompilerConfig {
            noise_root: root.join("MissingNoise"),
            mono_root: root.join("mono"),
            poly_root: root.join("poly"),
            training_path: root.join("training.db"),
            testing_path: root.join("testing.db"),
            ..CompilerConfig::default()
        }
    }

    #[test]
    fn test_missing_noise_directory_is_a_configuration_error() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let config = disk_config(dir.path());
        std::fs::create_dir_all(&config.mono_root).unwrap();
        std::fs::create_dir_all(&config.poly_root).unwrap();

        let mut compiler = FeatureCompiler::open(&config).unwrap();
        let result = compiler.compile_all(&mut ignore);

        assert!(matches!(
            result,
            Err(CompileError::Configuration { ref root, .. }) if *root == config.noise_root
        ));
        assert_eq!(compiler.training().record_count().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_requires_both_datasets() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let config = disk_config(dir.path());

        assert!(matches!(
            FeatureCompiler::open_existing(&config),
            Err(CompileError::MissingDataset { dataset: Dataset::Training, .. })
        ));
        assert!(!config.training_path.exists());
        assert!(!config.testing_path.exists());

        drop(FeatureCompiler::open(&config).unwrap());
        {
            let mut store = SqliteFeatureStore::open(&config.training_path, false).unwrap();
            let record = FeatureRecord {
                labels: crate::state::FeatureLabels {
                    notes: vec![40],
                    onset: true,
                    polyphony: 1,
                },
                features: vec![0.5; 75],
            };
            store.append(&[record], "piano").unwrap();
        }

        // existing data is never reset, even when overwrite is configured
        let overwrite = CompilerConfig {
            overwrite: true,
            ..config.clone()
        };
        let mut compiler = FeatureCompiler::open_existing(&overwrite).unwrap();
        compiler.shuffle(4, 1, &mut |_, _| {}).unwrap();
        assert_eq!(compiler.training().record_count().unwrap(), 1);
        assert!(compiler.processed().contains("piano"));
    }
}
