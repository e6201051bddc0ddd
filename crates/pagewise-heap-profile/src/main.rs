//! DHAT heap profiler for pagewise.
//!
//! Profiles allocation patterns of the pagination pipeline:
//! scan -> paginate -> session (miss then hit).
//!
//! Usage:
//!   cargo run -p pagewise-heap-profile --release -- [OPTIONS] [CHAPTER_FILES...]
//!
//! Files ending in `.xhtml`, `.html` or `.htm` are paginated as markup. With
//! no files, two synthetic chapters (plain and markup) are profiled.
//!
//! Outputs dhat-<phase>.json files in the output directory (default: target/memory).
//! Open in https://nnethercote.github.io/dh_view/dh_view.html

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::process::Command;

use pagewise::{paginate, ContentKind, Document, GridOracle, LayoutContext, PaginateOptions};
use pagewise_store::{ChapterSession, MemoryBoundaryCache};

const BOX_WIDTH: f32 = 480.0;
const BOX_HEIGHT: f32 = 800.0;
const SYNTHETIC_PREFIX: &str = "synthetic:";
const DEFAULT_INPUTS: &[&str] = &["synthetic:plain", "synthetic:markup"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scan,
    Paginate,
    Session,
}

impl Phase {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(Self::Scan),
            "paginate" => Some(Self::Paginate),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Paginate => "paginate",
            Self::Session => "session",
        }
    }
}

fn synthetic_chapter(name: &str) -> Option<(String, ContentKind)> {
    let sentence = "The harpooneer stood at the bow and watched the grey water fold over itself. ";
    match name {
        "plain" => Some((sentence.repeat(2_000), ContentKind::Plain)),
        "markup" => {
            let mut body = String::with_capacity(sentence.len() * 2_000 + 4_096);
            body.push_str("<html><body><section>");
            for para in 0..400 {
                body.push_str("<p>");
                body.push_str(&sentence.repeat(4));
                if para % 5 == 0 {
                    body.push_str("<em>Call me Ishmael.</em> &amp; so on.");
                }
                body.push_str("</p>");
            }
            body.push_str("</section></body></html>");
            Some((body, ContentKind::Markup))
        }
        _ => None,
    }
}

fn load_input(input: &str) -> (String, ContentKind) {
    if let Some(name) = input.strip_prefix(SYNTHETIC_PREFIX) {
        return synthetic_chapter(name)
            .unwrap_or_else(|| panic!("unknown synthetic chapter: {}", name));
    }
    let text = std::fs::read_to_string(input).unwrap_or_else(|e| panic!("read {}: {}", input, e));
    let lower = input.to_ascii_lowercase();
    let kind = if lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm") {
        ContentKind::Markup
    } else {
        ContentKind::Plain
    };
    (text, kind)
}

fn profile_input(input: &str, phase: Phase) {
    let (text, kind) = load_input(input);
    let layout = LayoutContext::for_box(BOX_WIDTH, BOX_HEIGHT);

    match phase {
        Phase::Scan => {
            let _doc = Document::new(&text, kind).unwrap_or_else(|e| panic!("scan {}: {}", input, e));
        }
        Phase::Paginate => {
            let doc = Document::new(&text, kind).unwrap_or_else(|e| panic!("scan {}: {}", input, e));
            let result = paginate(
                &doc,
                0,
                &layout,
                &mut GridOracle::new(),
                &PaginateOptions::default(),
            )
            .unwrap_or_else(|e| panic!("paginate {}: {}", input, e));
            if result.page_count() == 0 {
                panic!("paginate {} produced zero pages", input);
            }
        }
        Phase::Session => {
            let doc = Document::new(&text, kind).unwrap_or_else(|e| panic!("scan {}: {}", input, e));
            let session = ChapterSession::new(MemoryBoundaryCache::new());
            // Miss, then two hits: the common reopen pattern.
            for _ in 0..3 {
                let _ = session
                    .open("profile", input, &doc, &layout, &mut GridOracle::new())
                    .unwrap_or_else(|e| panic!("open {}: {}", input, e));
            }
        }
    }
}

/// Extract a short name from an input for use in output filenames.
fn short_name(input: &str) -> String {
    if let Some(name) = input.strip_prefix(SYNTHETIC_PREFIX) {
        return format!("synthetic-{name}");
    }
    PathBuf::from(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

fn usage() {
    eprintln!("Usage: heap-profile [OPTIONS] [CHAPTER_FILES...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --phase <scan|paginate|session>  Pipeline phase to profile (default: paginate)");
    eprintln!("  --out-dir <DIR>                  Output directory for dhat JSON (default: target/memory)");
    eprintln!("  --aggregate                      Single profile for all inputs (default: per-input)");
    eprintln!();
    eprintln!("By default, each input gets its own clean DHAT profile (separate process).");
    eprintln!("If no files are given, profiles synthetic:plain and synthetic:markup.");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut phase = Phase::Paginate;
    let mut out_dir = PathBuf::from("target/memory");
    let mut inputs: Vec<String> = Vec::with_capacity(8);
    let mut aggregate = false;
    // Internal flag: when set, we're a child process profiling a single input.
    let mut single_input_mode = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--phase" => {
                i += 1;
                let value = args.get(i).map(String::as_str).unwrap_or_default();
                phase = Phase::from_str(value).unwrap_or_else(|| {
                    eprintln!("Unknown phase: {}", value);
                    usage();
                    std::process::exit(1);
                });
            }
            "--out-dir" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    usage();
                    std::process::exit(1);
                };
                out_dir = PathBuf::from(value);
            }
            "--aggregate" => {
                aggregate = true;
            }
            "--single-input" => {
                single_input_mode = true;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                inputs.push(other.to_string());
            }
        }
        i += 1;
    }

    if inputs.is_empty() {
        inputs.extend(DEFAULT_INPUTS.iter().map(|s| s.to_string()));
    }

    std::fs::create_dir_all(&out_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output dir {}: {}", out_dir.display(), e);
        std::process::exit(1);
    });

    let phase_name = phase.name();

    // Child process mode: profile exactly the one input with DHAT active.
    if single_input_mode {
        assert!(inputs.len() == 1, "--single-input expects exactly one input");
        let input = &inputs[0];
        let name = short_name(input);
        let json_path = out_dir.join(format!("dhat-{phase_name}-{name}.json"));

        let _profiler = dhat::Profiler::builder().file_name(json_path).build();

        profile_input(input, phase);
        return;
    }

    if aggregate {
        let json_path = out_dir.join(format!("dhat-{phase_name}.json"));
        eprintln!(
            "heap-profile: phase={}, inputs={} (aggregate), out={}",
            phase_name,
            inputs.len(),
            out_dir.display()
        );

        let _profiler = dhat::Profiler::builder()
            .file_name(json_path.clone())
            .build();

        for input in &inputs {
            eprintln!("  profiling: {}", input);
            profile_input(input, phase);
        }

        eprintln!(
            "Done. Open {} in https://nnethercote.github.io/dh_view/dh_view.html",
            json_path.display()
        );
        return;
    }

    // Per-input mode (default): spawn a child process per input for clean DHAT sessions.
    let self_exe = std::env::current_exe().unwrap_or_else(|e| {
        eprintln!("Failed to determine own executable path: {}", e);
        std::process::exit(1);
    });

    eprintln!(
        "heap-profile: phase={}, inputs={} (per-input), out={}",
        phase_name,
        inputs.len(),
        out_dir.display()
    );

    let mut any_failed = false;
    for input in &inputs {
        let name = short_name(input);
        eprintln!(
            "  profiling: {} -> dhat-{}-{}.json",
            input, phase_name, name
        );

        let status = Command::new(&self_exe)
            .arg("--single-input")
            .arg("--phase")
            .arg(phase_name)
            .arg("--out-dir")
            .arg(&out_dir)
            .arg(input)
            .status();

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                eprintln!("    FAILED (exit {})", s.code().unwrap_or(-1));
                any_failed = true;
            }
            Err(e) => {
                eprintln!("    FAILED to spawn: {}", e);
                any_failed = true;
            }
        }
    }

    eprintln!();
    eprintln!("Profiles saved to {}", out_dir.display());
    eprintln!("Open in https://nnethercote.github.io/dh_view/dh_view.html");

    if any_failed {
        std::process::exit(1);
    }
}
