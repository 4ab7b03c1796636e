//! End to end: host edits in, styled runs out.

use std::{
  ops::Range,
  sync::Arc,
  time::Duration,
};

use futures_executor::block_on;
use ropey::Rope;
use rtk_event::{
  ManualExecutor,
  ManualScheduler,
  TaskHandle,
  run_until_idle,
};
use rtk_syntax::{
  Pipeline,
  PipelineError,
  SharedText,
  SyntaxError,
  buffer::Run,
  edit::{
    EditError,
    Inconsistency,
  },
  highlighter::TextTarget,
  resolver::{
    PatternRule,
    PatternTokenResolver,
    ResolveError,
    SyntaxTokenResolver,
    TokenResolver,
  },
  style::{
    AttributeSet,
    Color,
    SeenTokenNames,
    StyleMap,
  },
  syntax::{
    PARSE_TIMEOUT,
    ParseOptions,
    SyntaxTree,
    code::CodeGrammar,
    grammar::Loader,
  },
};

fn loader() -> Arc<Loader> {
  let mut loader = Loader::markdown();
  loader.register_code(
    "rust",
    CodeGrammar::new(["fn", "let", "match"], Some("//"), ['"']),
  );
  Arc::new(loader)
}

struct Session {
  text:      Arc<SharedText>,
  pipeline:  Pipeline,
  scheduler: ManualScheduler,
  executor:  ManualExecutor,
}

impl Session {
  fn new(text: &str) -> Self {
    let text = Arc::new(SharedText::new(text));
    let scheduler = ManualScheduler::new();
    let executor = ManualExecutor::new();
    let pipeline = Pipeline::new(
      text.clone(),
      loader(),
      StyleMap::default(),
      Arc::new(scheduler.clone()),
      Arc::new(executor.clone()),
      ParseOptions::default(),
    )
    .unwrap();
    Self {
      text,
      pipeline,
      scheduler,
      executor,
    }
  }

  /// Styles `text` from scratch and returns the resulting runs.
  fn fresh_runs(text: &str) -> Vec<Run> {
    let session = Self::new(text);
    session.run();
    session.runs()
  }

  fn edit(&mut self, range: Range<usize>, insert: &str) -> Result<(), PipelineError> {
    self.pipeline.will_change(range.clone())?;
    let change = self.text.replace(range, insert);
    self.pipeline.did_change(&change)
  }

  fn run(&self) {
    run_until_idle(&self.scheduler, &self.executor);
  }

  fn attrs(&self, pos: usize) -> AttributeSet {
    self.text.attributes_at(pos)
  }

  fn runs(&self) -> Vec<Run> {
    self.text.snapshot().runs().to_vec()
  }
}

#[test]
fn typing_emphasis_styles_it() {
  let mut session = Session::new("# Title\n\nbody em text");
  session.edit(16..16, "*").unwrap();
  session.edit(14..14, "*").unwrap();
  assert_eq!(session.text.contents(), "# Title\n\nbody *em* text");

  // nothing is styled from inside the notifications
  assert!(session.attrs(15).is_base());
  session.run();

  assert_eq!(session.attrs(0).foreground, Some(Color::ORANGE));
  let title = session.attrs(3);
  assert_eq!(title.bold, Some(true));
  assert_eq!(title.scale, Some(133));
  assert!(session.attrs(10).is_base());
  assert_eq!(session.attrs(14).foreground, Some(Color::GRAY));
  assert_eq!(session.attrs(15).italic, Some(true));
  assert_eq!(session.attrs(16).italic, Some(true));
  assert_eq!(session.attrs(17).foreground, Some(Color::GRAY));
  assert!(session.attrs(19).is_base());
}

#[test]
fn edits_before_a_turn_share_one_flush() {
  let mut session = Session::new("some text\n");
  for (at, insert) in [(0, "*"), (5, "*"), (10, "`a`")] {
    session.edit(at..at, insert).unwrap();
  }
  assert_eq!(session.scheduler.pending(), 1);
  session.run();
  assert_eq!(session.pipeline.highlighter().stats().flushes, 1);
  assert_eq!(session.attrs(1).italic, Some(true));
}

#[test]
fn restyling_is_idempotent_and_leaves_text_alone() {
  let source = "# Head\n\n```rust\nfn main() { let x = \"s\"; }\n```\n\n> quote **b** [l](u)\n";
  let session = Session::new(source);
  session.run();
  let runs = session.runs();
  let ops = session.text.snapshot().style_ops();
  assert!(ops > 0);

  session.pipeline.invalidate(TextTarget::All);
  session.run();
  assert_eq!(session.runs(), runs);
  assert_eq!(session.text.contents(), source);
}

#[test]
fn fenced_code_uses_its_language() {
  let session = Session::new("```rust\nlet x = 1; // c\n```\n");
  session.run();
  assert_eq!(session.attrs(8).foreground, Some(Color::PURPLE));
  assert_eq!(session.attrs(16).foreground, Some(Color::BLUE));
  assert_eq!(session.attrs(19).foreground, Some(Color::GREEN));
}

#[test]
fn small_edits_reparse_little() {
  let mut source = String::new();
  for i in 0..200 {
    source.push_str(&format!("line {i} has *emphasis* and `code`\n\n"));
  }
  let mut session = Session::new(&source);
  session.run();

  let at = source.find("line 100").unwrap() + 4;
  session.edit(at..at, "s").unwrap();
  {
    let syntax = session.pipeline.syntax().syntax();
    let stats = syntax.stats();
    assert!(!stats.full_reparse);
    assert!(stats.units_parsed <= 6, "{stats:?}");
    assert!(stats.layers_parsed <= 2, "{stats:?}");
  }

  let before = session.pipeline.highlighter().stats().requests;
  session.run();
  let stats = session.pipeline.highlighter().stats();
  assert!(stats.requests - before <= 2, "{stats:?}");
}

#[test]
fn diagnostics_collect_token_names() {
  let text = Arc::new(SharedText::new("# T\n\n`c` and *e*\n"));
  let scheduler = ManualScheduler::new();
  let executor = ManualExecutor::new();
  let seen = Arc::new(SeenTokenNames::new());
  let _pipeline = Pipeline::with_diagnostics(
    text.clone(),
    loader(),
    StyleMap::default(),
    Arc::new(scheduler.clone()),
    Arc::new(executor.clone()),
    ParseOptions::default(),
    seen.clone(),
  )
  .unwrap();
  run_until_idle(&scheduler, &executor);
  for name in ["text.title", "text.literal", "text.emphasis", "punctuation.special"] {
    assert!(seen.contains(name), "{name} missing from {:?}", seen.names());
  }
}

#[test]
fn pattern_resolver_drives_the_same_highlighter() {
  let session = Session::new("alpha beta");
  session.run();
  let buffer: Arc<dyn rtk_syntax::HostBuffer> = session.text.clone();
  let rule = PatternRule::new(r"beta", "text.strong").unwrap();
  session
    .pipeline
    .highlighter()
    .set_resolver(Arc::new(PatternTokenResolver::new(&buffer, vec![rule])));
  session.pipeline.invalidate(TextTarget::All);
  session.run();
  assert!(session.attrs(0).is_base());
  assert_eq!(session.attrs(6).bold, Some(true));
}

#[test]
fn reset_invalidates_old_resolvers() {
  let mut session = Session::new("# Title\n");
  session.run();
  let stale = SyntaxTokenResolver::new(session.pipeline.syntax());
  assert!(block_on(stale.resolve(0..8, TaskHandle::new())).is_ok());

  session.pipeline.reset().unwrap();
  assert_eq!(
    block_on(stale.resolve(0..8, TaskHandle::new())),
    Err(ResolveError::StateInvalid)
  );

  session.run();
  assert_eq!(session.pipeline.highlighter().stats().skipped, 0);
  assert_eq!(session.attrs(3).bold, Some(true));
}

#[test]
fn parse_timeout_reverts_to_base() {
  let mut session = Session::new("# Title\n\n*em*\n");
  session.run();
  assert_eq!(session.attrs(3).bold, Some(true));

  session
    .pipeline
    .syntax()
    .syntax()
    .set_timeout(Duration::ZERO);
  let err = session.edit(0..0, "x").unwrap_err();
  assert_eq!(
    err,
    PipelineError::Syntax(SyntaxError::ParseTimeout {
      budget: Duration::ZERO,
    })
  );
  assert_eq!(
    session.pipeline.syntax().highlights(0..4),
    Err(SyntaxError::NoRootNode)
  );

  session.run();
  let len = session.text.contents().chars().count();
  assert!((0..len).all(|pos| session.attrs(pos).is_base()));
  assert_eq!(session.text.contents(), "x# Title\n\n*em*\n");

  session
    .pipeline
    .syntax()
    .syntax()
    .set_timeout(PARSE_TIMEOUT);
  session.edit(0..1, "").unwrap();
  session.run();
  assert_eq!(session.attrs(3).bold, Some(true));
}

#[test]
fn out_of_sync_notifications_reset_the_session() {
  let mut session = Session::new("abc *d*\n");
  session.run();

  session.pipeline.will_change(0..1).unwrap();
  let change = session.text.replace(2..3, "xy");
  let err = session.pipeline.did_change(&change).unwrap_err();
  assert!(matches!(
    err,
    PipelineError::Edit(EditError::StateInconsistent(
      Inconsistency::RangeMismatch { .. }
    ))
  ));
  assert!(!session.pipeline.tracker().is_pending());
  assert_eq!(session.pipeline.tracker().len(), 9);

  let err = session.pipeline.did_change(&change).unwrap_err();
  assert!(matches!(
    err,
    PipelineError::Edit(EditError::StateInconsistent(
      Inconsistency::MissingWillChange
    ))
  ));

  session.edit(0..0, "_").unwrap();
  session.run();
  let contents = session.text.contents();
  assert_eq!(contents, "_abxy *d*\n");
  assert_eq!(session.runs(), Session::fresh_runs(&contents));
}

struct SimRng {
  state: u64,
}

impl SimRng {
  fn new(seed: u64) -> Self {
    Self {
      state: seed.max(1),
    }
  }

  fn next_u64(&mut self) -> u64 {
    let mut x = self.state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    self.state = x;
    x
  }

  fn next_usize(&mut self, upper: usize) -> usize {
    if upper == 0 {
      0
    } else {
      (self.next_u64() as usize) % upper
    }
  }
}

fn next_edit(rng: &mut SimRng, len_chars: usize) -> (Range<usize>, &'static str) {
  const TOKENS: &[&str] = &[
    "a", " ", "\n", "\n\n", "*", "**", "_", "`", "```", "```rust\n", "# ", "> ", "- ", "[", "](",
    ")", "<", "http://x>", "\\", "=", "let ", "\"", "é", "🙂",
  ];

  let op = if len_chars == 0 { 0 } else { rng.next_usize(3) };
  match op {
    0 => {
      let at = rng.next_usize(len_chars + 1);
      (at..at, TOKENS[rng.next_usize(TOKENS.len())])
    },
    1 => {
      let start = rng.next_usize(len_chars);
      let end = (start + 1 + rng.next_usize(8)).min(len_chars);
      (start..end, "")
    },
    _ => {
      let start = rng.next_usize(len_chars);
      let end = (start + 1 + rng.next_usize(4)).min(len_chars);
      (start..end, TOKENS[rng.next_usize(TOKENS.len())])
    },
  }
}

#[test]
fn replacing_the_content_drops_outstanding_results() {
  let mut session = Session::new("**bold** text\n");
  session.run();
  session.pipeline.invalidate(TextTarget::Range(0..8));
  session.scheduler.run_until_idle();
  session.executor.run_until_stalled();
  // the result now waits for delivery against the old text
  assert_eq!(session.scheduler.pending(), 1);

  let replacement = "plain `x` and more words\n";
  let len = session.text.contents().chars().count();
  session.text.replace(0..len, replacement);
  let ops = session.text.snapshot().style_ops();
  session.pipeline.replace_content().unwrap();
  session.scheduler.run_until_idle();
  assert_eq!(session.text.snapshot().style_ops(), ops);
  assert_eq!(session.pipeline.highlighter().stats().stale, 1);

  session.run();
  assert_eq!(session.runs(), Session::fresh_runs(replacement));
}

#[test]
fn deterministic_edit_simulation() {
  let initial = "# Doc\n\nsome *text* here\n\n```rust\nfn f() { let s = \"x\"; }\n```\n\n- item \
                 **b**\n> quote `c`\n";
  for seed in 1..=6u64 {
    let mut rng = SimRng::new(seed);
    let mut session = Session::new(initial);
    session.run();

    for step in 0..40 {
      let len = session.text.contents().chars().count();
      let (range, insert) = next_edit(&mut rng, len);
      session
        .edit(range.clone(), insert)
        .unwrap_or_else(|err| panic!("seed {seed} step {step} {range:?}: {err}"));
      session.run();

      let contents = session.text.contents();
      let len = contents.chars().count();
      let mut fresh = SyntaxTree::new(Rope::from_str(&contents), loader(), ParseOptions::default());
      fresh.parse().unwrap();
      assert_eq!(
        session.pipeline.syntax().highlights(0..len),
        fresh.highlights(0..len),
        "seed {seed} step {step}: {contents:?}"
      );
      assert_eq!(
        session.pipeline.syntax().syntax().layers(),
        fresh.layers(),
        "seed {seed} step {step}: {contents:?}"
      );
      if step % 8 == 7 {
        assert_eq!(
          session.runs(),
          Session::fresh_runs(&contents),
          "seed {seed} step {step}: {contents:?}"
        );
      }
    }
  }
}
