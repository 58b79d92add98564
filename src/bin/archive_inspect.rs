//! archive-inspect: read-only view of a file-backed family archive.
//!
//! Usage:
//!   archive-inspect [storage-dir]            per-key record counts by tenant
//!   archive-inspect [storage-dir] <user-id>  load one tenant, print its summary
//!
//! Without a storage dir, the directory from `~/.family-archive/config.json`
//! is used. Set `RUST_LOG=debug` for codec diagnostics.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use family_archive_lib::codec;
use family_archive_lib::config::load_config;
use family_archive_lib::{ArchiveStore, FileMedium, PersistenceMedium, User};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("archive-inspect: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let config = load_config().map_err(|e| e.to_string())?;

    let (dir, user_id) = match args.as_slice() {
        [] => (None, None),
        [dir] => (Some(PathBuf::from(dir)), None),
        [dir, user] => (Some(PathBuf::from(dir)), Some(user.clone())),
        _ => return Err("usage: archive-inspect [storage-dir] [user-id]".to_string()),
    };

    let dir = match dir {
        Some(d) => d,
        None => config.resolve_storage_dir().map_err(|e| e.to_string())?,
    };
    if !dir.is_dir() {
        return Err(format!("storage dir not found: {}", dir.display()));
    }

    let medium = Arc::new(FileMedium::open(&dir, config.quota_bytes).map_err(|e| e.to_string())?);
    log::info!("Inspecting {} ({} bytes used)", dir.display(), medium.usage_bytes());

    match user_id {
        None => print_counts(medium.as_ref(), &config.keys.all()),
        Some(user_id) => print_tenant(medium, config.keys, &user_id),
    }
}

fn print_counts(medium: &dyn PersistenceMedium, keys: &[&str]) -> Result<(), String> {
    let mut report = serde_json::Map::new();
    for key in keys {
        let counts: serde_json::Map<String, serde_json::Value> =
            codec::owner_counts(&codec::read_blob(medium, key))
                .into_iter()
                .map(|(owner, n)| (owner, serde_json::Value::from(n)))
                .collect();
        report.insert(key.to_string(), serde_json::Value::Object(counts));
    }
    let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn print_tenant(
    medium: Arc<FileMedium>,
    keys: family_archive_lib::StorageKeys,
    user_id: &str,
) -> Result<(), String> {
    let mut store = ArchiveStore::new(medium, keys);
    store.observe_user(Some(&User::new(user_id, user_id)));
    store.run_reactions();

    let state = store.state();
    let summary = state.circle_summary();
    let out = serde_json::json!({
        "tenant": user_id,
        "circle": summary,
        "label": summary.label(),
        "profiles": state.profiles().iter().map(|p| &p.name).collect::<Vec<_>>(),
        "familyTrees": state.family_trees().iter().map(|t| &t.name).collect::<Vec<_>>(),
        "posts": state.circle_posts().len(),
    });
    let out = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}
