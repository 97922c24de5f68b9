use std::cmp;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use movequiz_rs::config::{DataPaths, QuizSettings};
use movequiz_rs::{
    Ambiguity, AmbiguityResolver, CachedTranslator, CorpusTranslator, NameTranslationPort,
    Question, QuestionGenerator, ReferenceCorpus, StatQuestion, artwork_url,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

const SUGGESTION_LIMIT: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "movequiz-rs", about = "Guess the Pokémon from its moves", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    data: DataArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Directory of ranked usage files.
    #[arg(long, global = true, default_value = "json_data")]
    usage_dir: PathBuf,
    /// Reference cache used for decoys and ambiguity checks.
    #[arg(long, global = true, default_value = "all_moves_cache_3.json")]
    move_corpus: PathBuf,
    /// Reference cache carrying base stats.
    #[arg(long, global = true, default_value = "all_moves_cache_4.json")]
    stat_corpus: PathBuf,
    /// Keep only the top N entities of every usage file.
    #[arg(long, global = true, default_value_t = movequiz_rs::config::DEFAULT_TOP_N)]
    top_n: usize,
    /// Per-entity move pool cap.
    #[arg(long, global = true, default_value_t = movequiz_rs::config::DEFAULT_MOVE_POOL)]
    move_pool: usize,
    /// Genuine clue moves per question.
    #[arg(long, global = true, default_value_t = movequiz_rs::config::DEFAULT_CLUES)]
    clues: usize,
    /// Decoy moves per question.
    #[arg(long, global = true, default_value_t = movequiz_rs::config::DEFAULT_DECOYS)]
    decoys: usize,
    /// Seed for reproducible questions.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Resolve names from the reference cache instead of PokeAPI.
    #[arg(long, global = true)]
    offline: bool,
}

impl DataArgs {
    fn paths(&self) -> DataPaths {
        DataPaths {
            usage_dir: self.usage_dir.clone(),
            move_corpus: self.move_corpus.clone(),
            stat_corpus: self.stat_corpus.clone(),
        }
    }

    fn settings(&self) -> QuizSettings {
        QuizSettings {
            top_n: self.top_n,
            move_pool: self.move_pool,
            clues: self.clues,
            decoys: self.decoys,
            ..QuizSettings::default()
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a move-guess question.
    Moves {
        /// Show the answer and the ambiguity check.
        #[arg(long)]
        reveal: bool,
    },
    /// Generate a base-stat guess question.
    Stats {
        /// Show the answer.
        #[arg(long)]
        reveal: bool,
    },
    /// List every other entity that knows all of the given moves.
    Check {
        /// The intended answer, excluded from the matches.
        #[arg(long)]
        answer: String,
        /// Clue moves.
        #[arg(required = true)]
        moves: Vec<String>,
    },
    /// Operations on the reference cache.
    #[command(subcommand)]
    Corpus(CorpusCommand),
    /// Operations on the merged usage statistics.
    #[command(subcommand)]
    Usage(UsageCommand),
    /// Run the shared-board HTTP service.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Shared secret granting the host role.
        #[arg(long, env = "MOVEQUIZ_HOST_SECRET", hide_env_values = true)]
        host_secret: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CorpusCommand {
    /// Show the entry a name resolves to, exact or by form prefix.
    Show {
        /// Entity name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum UsageCommand {
    /// List merged usage records.
    List {
        /// Maximum number of records to print.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    let as_json = cli.json;
    match cli.command {
        Command::Moves { reveal } => handle_moves(&cli.data, reveal, as_json),
        Command::Stats { reveal } => handle_stats(&cli.data, reveal, as_json),
        Command::Check { answer, moves } => handle_check(&cli.data, &answer, &moves, as_json),
        Command::Corpus(CorpusCommand::Show { name }) => {
            handle_corpus_show(&cli.data, &name, as_json)
        }
        Command::Usage(UsageCommand::List { limit }) => handle_usage_list(&cli.data, limit, as_json),
        #[cfg(feature = "web")]
        Command::Serve { addr, host_secret } => handle_serve(&cli.data, addr, host_secret),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_generator(data: &DataArgs) -> QuestionGenerator {
    let paths = data.paths();
    let settings = data.settings();
    let translator = build_translator(data, &paths);
    QuestionGenerator::load(&paths, settings, translator)
}

fn build_translator(data: &DataArgs, paths: &DataPaths) -> Arc<dyn NameTranslationPort> {
    if let Some(online) = online_translator(data) {
        return online;
    }
    let corpus = Arc::new(ReferenceCorpus::load(&paths.move_corpus));
    Arc::new(CachedTranslator::new(CorpusTranslator::new(corpus)))
}

#[cfg(feature = "pokeapi")]
fn online_translator(data: &DataArgs) -> Option<Arc<dyn NameTranslationPort>> {
    if data.offline {
        return None;
    }
    match movequiz_rs::pokeapi::PokeApiTranslator::new() {
        Ok(translator) => Some(Arc::new(CachedTranslator::new(translator))),
        Err(err) => {
            tracing::warn!(error = %err, "falling back to offline names");
            None
        }
    }
}

#[cfg(not(feature = "pokeapi"))]
fn online_translator(_data: &DataArgs) -> Option<Arc<dyn NameTranslationPort>> {
    None
}

fn handle_moves(data: &DataArgs, reveal: bool, as_json: bool) -> Result<(), Box<dyn Error>> {
    let generator = build_generator(data);
    let question = generator.generate(&mut data.rng())?;
    let verdict = reveal.then(|| AmbiguityResolver::new(generator.corpus()).check(&question));

    if as_json {
        let mut payload = json!({ "moves": question.clue_moves, "display": question.clue_names });
        if let Some(verdict) = &verdict {
            payload["answer"] = answer_json(&question);
            payload["ambiguity"] = serde_json::to_value(verdict)?;
        }
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_move_question(&question, verdict.as_ref());
    }
    Ok(())
}

fn handle_stats(data: &DataArgs, reveal: bool, as_json: bool) -> Result<(), Box<dyn Error>> {
    let generator = build_generator(data);
    let question = generator.generate_stat_question(&mut data.rng())?;

    if as_json {
        let mut payload = json!({
            "stats": question.stats,
            "total": question.stats.total(),
        });
        if reveal {
            payload["answer"] = json!({
                "key": question.answer_key,
                "names": question.answer_names,
                "id": question.answer_id,
                "source": question.source,
                "rank": question.rank,
                "artwork": artwork_url(question.answer_id),
            });
        }
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_stat_question(&question, reveal);
    }
    Ok(())
}

fn handle_check(
    data: &DataArgs,
    answer: &str,
    moves: &[String],
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if moves.iter().all(|name| name.trim().is_empty()) {
        return Err("at least one non-blank move is required".into());
    }
    let corpus = ReferenceCorpus::load(&data.move_corpus);
    let verdict = AmbiguityResolver::new(&corpus).check_moves(moves, answer);
    if as_json {
        let payload = json!({
            "answer": answer,
            "moves": moves,
            "result": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(())
}

fn handle_corpus_show(data: &DataArgs, name: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let corpus = ReferenceCorpus::load(&data.move_corpus);
    let Some(entry) = corpus.resolve(name) else {
        let suggestions = corpus.suggest(name, SUGGESTION_LIMIT);
        if as_json {
            let payload = json!({
                "query": name,
                "found": false,
                "suggestions": suggestions.iter().map(|(key, score)| {
                    json!({ "key": key, "score": score })
                }).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }
        let hint = suggestions
            .iter()
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if hint.is_empty() {
            return Err(format!("No entry found for {name:?}").into());
        }
        return Err(format!("No entry found for {name:?}; did you mean: {hint}").into());
    };

    if as_json {
        let payload = json!({
            "query": name,
            "found": true,
            "key": entry.key(),
            "id": entry.id(),
            "names": entry.display_names(),
            "stats": entry.stats(),
            "moves": entry.moves(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Entry: {} ({})", entry.key(), entry.display_names());
    if let Some(id) = entry.id() {
        println!("ID: #{id}");
    }
    if let Some(stats) = entry.stats() {
        println!(
            "Stats: {}/{}/{}/{}/{}/{} (BST {})",
            stats.hp,
            stats.atk,
            stats.def,
            stats.spa,
            stats.spd,
            stats.spe,
            stats.total()
        );
    }
    if let Some(moves) = format_list(entry.moves(), 24) {
        println!("Moves ({}): {moves}", entry.moves().len());
    }
    Ok(())
}

fn handle_usage_list(data: &DataArgs, limit: usize, as_json: bool) -> Result<(), Box<dyn Error>> {
    let repo = movequiz_rs::UsageRepository::load_dir(&data.usage_dir, &data.settings());
    let limit = cmp::max(1, limit);
    let mut records: Vec<_> = repo.iter().collect();
    records.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.key.cmp(&b.key)));
    records.truncate(limit);

    if as_json {
        let payload = json!({
            "total": repo.len(),
            "limit": limit,
            "results": records,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No usage records loaded from {}.", data.usage_dir.display());
        return Ok(());
    }
    let width = records
        .iter()
        .map(|record| record.name.len())
        .max()
        .unwrap_or(4)
        .max("NAME".len());
    println!("{:<width$}  {:>4}  {:<16}  {}", "NAME", "RANK", "SOURCE", "MOVES", width = width);
    println!("{:-<width$}  ----  {:-<16}  -----", "", "", width = width);
    for record in records {
        println!(
            "{:<width$}  {:>4}  {:<16}  {}",
            record.name,
            record.rank,
            record.source,
            record.moves.len(),
            width = width
        );
    }
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(
    data: &DataArgs,
    addr: std::net::SocketAddr,
    host_secret: Option<String>,
) -> Result<(), Box<dyn Error>> {
    use movequiz_rs::web::{WebConfig, serve};

    let generator = build_generator(data);
    let config = WebConfig {
        addr,
        host_secret,
        ..WebConfig::default()
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, generator))?;
    Ok(())
}

fn answer_json(question: &Question) -> serde_json::Value {
    json!({
        "key": question.answer_key,
        "names": question.answer_names,
        "id": question.answer_id,
        "source": question.source,
        "rank": question.rank,
        "artwork": artwork_url(question.answer_id),
    })
}

fn print_move_question(question: &Question, verdict: Option<&Ambiguity>) {
    let mut body = String::from("This Pokémon runs:\n\n");
    for card in &question.clue_display {
        body.push_str("---\n\n");
        body.push_str(card);
        body.push_str("\n\n");
    }
    render_markdown_block("Question", &body);

    if let Some(verdict) = verdict {
        println!(
            "\nAnswer: {} ({})",
            question.answer_names.zh, question.answer_names.ja
        );
        println!("English: {} | ID: #{}", question.answer_names.en, question.answer_id);
        println!("Source: {} (Rank: #{})", question.source, question.rank);
        println!("Artwork: {}", artwork_url(question.answer_id));
        print_verdict(verdict);
    }
}

fn print_stat_question(question: &StatQuestion, reveal: bool) {
    let stats = &question.stats;
    println!("Guess the Pokémon from its base stats:");
    println!("  HP      {:>3}   Attack  {:>3}   Defense {:>3}", stats.hp, stats.atk, stats.def);
    println!("  Sp. Atk {:>3}   Sp. Def {:>3}   Speed   {:>3}", stats.spa, stats.spd, stats.spe);
    println!("  BST {}", stats.total());
    if reveal {
        println!(
            "\nAnswer: {} ({})",
            question.answer_names.zh, question.answer_names.ja
        );
        println!("English: {} | ID: #{}", question.answer_names.en, question.answer_id);
        println!("Source: {} (Rank: #{})", question.source, question.rank);
        println!("Artwork: {}", artwork_url(question.answer_id));
    }
}

fn print_verdict(verdict: &Ambiguity) {
    match verdict {
        Ambiguity::Unavailable => println!("\nAmbiguity check unavailable: no reference cache loaded."),
        Ambiguity::Unique => println!("\nUnique: no other Pokémon knows all of these moves."),
        Ambiguity::Ambiguous(matches) => {
            println!("\n{} other Pokémon also know these moves:", matches.len());
            for names in matches {
                println!("- {names}");
            }
        }
    }
}

fn format_list(items: &[String], limit: usize) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let truncated = items.len() > limit;
    let display = if truncated {
        &items[..limit]
    } else {
        &items[..]
    };
    let mut text = display.join(", ");
    if truncated {
        text.push_str(", …");
    }
    Some(text)
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
