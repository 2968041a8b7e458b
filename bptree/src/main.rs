use bptree::config::IndexConfig;
use bptree::storage::BlockFile;
use bptree::storage::btree::{BPlusTree, BTreeError, IndexKey, KeyFormat, KeyKind, Locator};
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entries per page when handing out demo locators.
const SLOTS_PER_PAGE: u32 = 64;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: index_path={}, block_size={}, key_format={:?}, demo_keys={}",
        config.index_path.display(),
        config.block_size,
        config.key_format,
        config.demo_keys
    );

    if let Err(e) = run(&config) {
        tracing::error!("Demo workload failed: {e}");
        std::process::exit(1);
    }
}

/// A randomly generated key owned by the demo.
enum DemoKey {
    Int(i32),
    Str(Vec<u8>),
}

impl DemoKey {
    fn random(rng: &mut impl Rng, format: KeyFormat) -> Self {
        match format.kind() {
            KeyKind::Integer => Self::Int(rng.random()),
            KeyKind::String => Self::Str(
                (0..format.width())
                    .map(|_| rng.sample(Alphanumeric))
                    .collect(),
            ),
        }
    }

    fn as_key(&self) -> IndexKey<'_> {
        match self {
            Self::Int(v) => IndexKey::Int(*v),
            Self::Str(bytes) => IndexKey::Str(bytes),
        }
    }
}

fn run(config: &IndexConfig) -> Result<(), BTreeError> {
    let mut file = BlockFile::open_or_create(&config.index_path, config.block_size)?;
    workload(&mut file, config)?;
    file.sync()?;
    Ok(())
}

fn workload(file: &mut BlockFile, config: &IndexConfig) -> Result<(), BTreeError> {
    let mut tree = BPlusTree::open(file, config.key_format)?;
    let mut rng = rand::rng();

    let mut stored = Vec::with_capacity(config.demo_keys);
    let mut duplicates = 0usize;
    for (slot, _) in (0u32..).zip(0..config.demo_keys) {
        let key = DemoKey::random(&mut rng, config.key_format);
        let locator = Locator::new(slot / SLOTS_PER_PAGE, slot % SLOTS_PER_PAGE);
        if tree.insert(key.as_key(), locator)? {
            stored.push((key, locator));
        } else {
            duplicates += 1;
        }
    }
    tracing::info!(
        "inserted {} keys ({duplicates} already present)",
        stored.len()
    );

    for (key, locator) in &stored {
        let found = tree.query(key.as_key())?;
        if found != Some(*locator) {
            return Err(BTreeError::Corrupt(format!(
                "query returned {found:?}, expected {locator:?}"
            )));
        }
    }

    // Drop every other key again so merges and the free list get exercised
    let mut removed = 0usize;
    for (key, _) in stored.iter().step_by(2) {
        if tree.remove(key.as_key())? {
            removed += 1;
        }
    }

    let stats = tree.verify()?;
    tracing::info!(
        "removed {removed} keys; tree height={}, leaves={}, internal={}, entries={}, root={}, free_list_head={}",
        stats.height,
        stats.leaf_blocks,
        stats.internal_blocks,
        stats.entries,
        tree.root_position(),
        tree.free_list_head()
    );

    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("tree: {}", tree.dump()?);
    }
    Ok(())
}
