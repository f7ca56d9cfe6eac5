use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::Value;

use cre_image::ImageResolver;
use cre_journal::{FileJournal, LocalFallbackStore};
use cre_reconcile::{CommentReconciler, MergeReport};
use cre_remote::{CommentPayload, ItemDetailPayload, Normalizer, RichCommentPayload};
use cre_repository::EngineConfig;
use cre_types::{Comment, LocalId};
use cre_votes::{rank_entries, winners};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    match cli.command {
        Command::Resolve(args) => cmd_resolve(args, &config, cli.format),
        Command::Merge(args) => cmd_merge(args, &config, cli.format),
        Command::Rank(args) => cmd_rank(args, cli.format),
        Command::Journal(args) => cmd_journal(args, &config, cli.format),
        Command::Config => cmd_config(&config, cli.format),
    }
}

fn cmd_resolve(args: ResolveArgs, config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut resolver_config = config.resolver.clone();
    if let Some(base_url) = args.base_url {
        resolver_config.base_url = base_url;
    }
    let resolver = ImageResolver::new(&resolver_config);

    let resolved: Vec<(String, Option<String>)> = args
        .refs
        .into_iter()
        .map(|raw| {
            let url = resolve_arg(&resolver, &raw);
            (raw, url)
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let out: Vec<Value> = resolved
                .iter()
                .map(|(raw, url)| serde_json::json!({ "raw": raw, "url": url }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for (raw, url) in &resolved {
                match url {
                    Some(url) => println!("{} → {}", raw, url.green()),
                    None => println!("{} → {}", raw, "(unrecognised)".dimmed()),
                }
            }
        }
    }
    Ok(())
}

/// Arguments that parse as JSON are resolved as JSON values (so `null` or
/// `{"url": ..}` work); anything else is a plain string.
fn resolve_arg(resolver: &ImageResolver, raw: &str) -> Option<String> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    resolver.resolve(&value)
}

fn cmd_merge(args: MergeArgs, config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let normalizer = Normalizer::new(ImageResolver::new(&config.resolver));
    let (merged, report) = merge_files(
        &normalizer,
        &args.post_id,
        &args.rich,
        &args.authoritative,
        args.previous.as_deref(),
    )?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&merged)?),
        OutputFormat::Text => {
            for c in &merged {
                let image = c.image_ref.as_deref().unwrap_or("-");
                println!(
                    "{} {} {} {} ♥{}",
                    c.id.yellow(),
                    c.author.bold(),
                    c.content,
                    image.blue(),
                    c.like_count
                );
            }
            println!(
                "\n{} {} exact, {} content-only, {} standalone, {} duplicates dropped, {} carried forward",
                "✓".green().bold(),
                report.matched_exact,
                report.matched_content_only,
                report.standalone,
                report.duplicates_dropped,
                report.carried_forward
            );
        }
    }
    Ok(())
}

fn merge_files(
    normalizer: &Normalizer,
    post_id: &str,
    rich: &Path,
    authoritative: &Path,
    previous: Option<&Path>,
) -> anyhow::Result<(Vec<Comment>, MergeReport)> {
    let rich: Vec<_> = match read_json(rich)? {
        Value::Array(values) => values
            .into_iter()
            .map(|v| normalizer.rich_comment(RichCommentPayload::from_value(v)))
            .collect(),
        _ => anyhow::bail!("{}: expected a JSON array", rich.display()),
    };
    let authoritative: Vec<Comment> = match read_json(authoritative)? {
        Value::Array(values) => values.into_iter().map(CommentPayload::from_value).collect(),
        detail => ItemDetailPayload::from_value(detail).comments,
    }
    .into_iter()
    .map(|payload| normalizer.comment(post_id, payload))
    .filter(|c| !c.id.is_empty())
    .collect();
    let previous: Vec<Comment> = match previous {
        Some(path) => serde_json::from_value(read_json(path)?)
            .with_context(|| format!("{}: not a merged comment list", path.display()))?,
        None => Vec::new(),
    };
    Ok(CommentReconciler::new(post_id).merge_with_report(&rich, &authoritative, &previous))
}

fn cmd_rank(args: RankArgs, format: OutputFormat) -> anyhow::Result<()> {
    let comments: Vec<Comment> = serde_json::from_value(read_json(&args.comments)?)
        .with_context(|| format!("{}: not a merged comment list", args.comments.display()))?;
    let ranked = rank_entries(comments);
    let shown: Vec<_> = if args.winners {
        winners(&ranked).cloned().collect()
    } else {
        ranked
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&shown)?),
        OutputFormat::Text => {
            if shown.is_empty() {
                println!("No entries.");
            }
            for r in &shown {
                let rank = format!("#{}", r.rank);
                let rank = if r.rank == 1 { rank.green().bold() } else { rank.normal() };
                println!(
                    "{} {} {} ♥{}",
                    rank,
                    r.entry.id.yellow(),
                    r.entry.author.bold(),
                    r.entry.like_count
                );
            }
        }
    }
    Ok(())
}

fn cmd_journal(args: JournalArgs, config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.journal.dir.clone());
    let user = args.user.unwrap_or_else(|| config.repository.user_id.clone());
    let backend = FileJournal::open_namespace(&dir, &user, config.journal.sync_mode)
        .with_context(|| format!("opening journal {user} in {}", dir.display()))?;
    let store = LocalFallbackStore::open(
        user.clone(),
        backend,
        config.journal.clone(),
        ImageResolver::new(&config.resolver),
    )?;

    match args.action {
        JournalAction::List => {
            let pending = store.list_pending(None);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pending)?),
                OutputFormat::Text if pending.is_empty() => println!("Journal {} is empty.", user.bold()),
                OutputFormat::Text => {
                    println!("Journal {}: {} pending", user.bold(), pending.len());
                    for w in &pending {
                        println!(
                            "  {} {:<13} {} {}",
                            w.local_id.short_id().yellow(),
                            w.kind.to_string().cyan(),
                            w.target_id,
                            w.created_at.to_rfc3339().dimmed()
                        );
                    }
                }
            }
        }
        JournalAction::Confirm { local_id } => {
            let id: LocalId = local_id.parse()?;
            if store.confirm(&id) {
                println!("{} Confirmed {}", "✓".green(), id.to_string().yellow());
            } else {
                anyhow::bail!("no pending write {id}");
            }
        }
        JournalAction::Compact => {
            store.flush()?;
            println!("{} Journal {} compacted: {} pending", "✓".green(), user.bold(), store.len());
        }
    }
    Ok(())
}

fn cmd_config(config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cre_image::ResolverConfig;

    fn normalizer() -> Normalizer {
        Normalizer::new(ImageResolver::new(&ResolverConfig::with_base_url("https://host")))
    }

    fn write(dir: &Path, name: &str, value: Value) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn json_arguments_resolve_as_values() {
        let resolver = ImageResolver::new(&ResolverConfig::with_base_url("https://host"));
        assert_eq!(
            resolve_arg(&resolver, "uploads/a.png").as_deref(),
            Some("https://host/uploads/a.png")
        );
        assert_eq!(resolve_arg(&resolver, "null"), None);
        assert_eq!(
            resolve_arg(&resolver, r#"{"url": "/uploads/b.png"}"#).as_deref(),
            Some("https://host/uploads/b.png")
        );
    }

    #[test]
    fn merge_reads_detail_objects_and_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let rich = write(
            dir.path(),
            "rich.json",
            serde_json::json!([{ "author": "Ada", "content": "[contest-entry]", "imageUrl": "uploads/a.png" }]),
        );
        let detail = write(
            dir.path(),
            "detail.json",
            serde_json::json!({ "id": 9, "comments": [{ "id": 17, "author": "Ada", "content": "[contest-entry]", "likedBy": [3] }] }),
        );

        let (merged, report) = merge_files(&normalizer(), "9", &rich, &detail, None).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "17");
        assert_eq!(merged[0].image_ref.as_deref(), Some("https://host/uploads/a.png"));
        assert_eq!(merged[0].like_count, 1);
        assert_eq!(report.matched_exact, 1);

        let array = write(
            dir.path(),
            "array.json",
            serde_json::json!([{ "id": "17", "author": "Ada", "content": "[contest-entry]" }]),
        );
        let previous = write(dir.path(), "prev.json", serde_json::to_value(&merged).unwrap());
        let (again, report) = merge_files(&normalizer(), "9", &rich, &array, Some(&previous)).unwrap();
        assert!(again[0].liked_by.contains("3"));
        assert_eq!(report.carried_forward, 1);
    }

    #[test]
    fn merge_rejects_non_array_rich_file() {
        let dir = tempfile::tempdir().unwrap();
        let rich = write(dir.path(), "rich.json", serde_json::json!({ "author": "Ada" }));
        let detail = write(dir.path(), "detail.json", serde_json::json!([]));
        assert!(merge_files(&normalizer(), "9", &rich, &detail, None).is_err());
    }
}
