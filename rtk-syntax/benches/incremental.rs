//! Benchmarks for parsing, incremental re-parsing and highlighting.
//!
//! Run with: `cargo bench -p rtk-syntax --bench incremental`

use std::sync::Arc;

use divan::{
  Bencher,
  black_box,
};
use ropey::Rope;
use rtk_event::{
  ManualExecutor,
  ManualScheduler,
  run_until_idle,
};
use rtk_syntax::{
  EditRecord,
  Pipeline,
  SharedText,
  StyleMap,
  SyntaxTree,
  syntax::{
    ParseOptions,
    code::CodeGrammar,
    grammar::Loader,
  },
};

fn main() {
  divan::main();
}

fn loader() -> Arc<Loader> {
  let mut loader = Loader::markdown();
  loader.register_code(
    "rust",
    CodeGrammar::new(["fn", "let", "match", "pub"], Some("//"), ['"']),
  );
  Arc::new(loader)
}

fn make_markdown(sections: usize) -> String {
  let mut doc = String::new();
  for i in 0..sections {
    doc.push_str(&format!("## Section {i}\n\n"));
    doc.push_str("Some *emphasis*, some **strong** text and `code` with a [link](https://x.y).\n");
    doc.push_str("A second line with an <https://auto.link> and an escaped \\* star.\n\n");
    doc.push_str("- item one\n- item **two**\n\n");
    doc.push_str("```rust\npub fn f(x: u32) -> u32 {\n  let y = \"s\"; // note\n  x + 1\n}\n```\n\n");
  }
  doc
}

fn parsed(doc: &str) -> SyntaxTree {
  let mut tree = SyntaxTree::new(Rope::from_str(doc), loader(), ParseOptions::default());
  tree.parse().unwrap();
  tree
}

mod parse {
  use super::*;

  #[divan::bench(args = [10, 100, 1000])]
  fn full(bencher: Bencher, sections: usize) {
    let doc = make_markdown(sections);

    bencher.bench_local(|| {
      black_box(parsed(black_box(&doc)));
    });
  }
}

mod edit {
  use super::*;

  #[divan::bench(args = [10, 100, 1000])]
  fn insert_in_paragraph(bencher: Bencher, sections: usize) {
    let doc = make_markdown(sections);
    let at = doc[..doc.len() / 2].chars().count();

    bencher
      .with_inputs(|| parsed(&doc))
      .bench_local_values(|mut tree| {
        let set = tree.apply_edit(&EditRecord::insert(at, 1), "x").unwrap();
        black_box((tree, set));
      });
  }

  #[divan::bench(args = [10, 100, 1000])]
  fn open_fence(bencher: Bencher, sections: usize) {
    let doc = make_markdown(sections);

    bencher
      .with_inputs(|| parsed(&doc))
      .bench_local_values(|mut tree| {
        let set = tree
          .apply_edit(&EditRecord::insert(0, 4), "```\n")
          .unwrap();
        black_box((tree, set));
      });
  }
}

mod highlight {
  use super::*;

  #[divan::bench(args = [10, 100, 1000])]
  fn viewport(bencher: Bencher, sections: usize) {
    let tree = parsed(&make_markdown(sections));
    let start = tree.len_chars() / 2;
    let range = start..(start + 4096).min(tree.len_chars());

    bencher.bench_local(|| {
      black_box(tree.highlights(black_box(range.clone())).unwrap());
    });
  }

  #[divan::bench(args = [10, 100])]
  fn keystroke_to_styled(bencher: Bencher, sections: usize) {
    let doc = make_markdown(sections);
    let at = doc[..doc.len() / 2].chars().count();

    bencher
      .with_inputs(|| {
        let text = Arc::new(SharedText::new(&doc));
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
        run_until_idle(&scheduler, &executor);
        (text, pipeline, scheduler, executor)
      })
      .bench_local_values(|(text, mut pipeline, scheduler, executor)| {
        pipeline.will_change(at..at).unwrap();
        let change = text.replace(at..at, "*");
        pipeline.did_change(&change).unwrap();
        run_until_idle(&scheduler, &executor);
        black_box((text, pipeline));
      });
  }
}
