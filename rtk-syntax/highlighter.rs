//! Turns stale ranges into attribute runs on the host buffer.
//!
//! Stale ranges are reported through [`Highlighter::invalidate`] and
//! collected by an [`InvalidationCoordinator`]. The first report schedules a
//! flush on the host's serial [`Scheduler`]. The flush asks the
//! [`TokenResolver`] for every range and runs the resulting futures on the
//! [`Executor`]. Each result is delivered back through the scheduler, so the
//! buffer is only ever styled from a scheduled job and never while the host
//! is still inside an edit notification.

use std::{
  collections::BTreeMap,
  fmt,
  ops::Range,
  sync::{
    Arc,
    Weak,
  },
};

use futures_util::FutureExt;
use parking_lot::Mutex;
use rtk_event::{
  Executor,
  Scheduler,
  TaskHandle,
  cancelable_future,
};

use crate::{
  buffer::HostBuffer,
  edit::EditRecord,
  invalidation::{
    FlushDecision,
    FlushState,
    InvalidationCoordinator,
    InvalidationSet,
  },
  resolver::{
    ResolveError,
    TokenAction,
    TokenApplication,
    TokenResolver,
  },
  style::{
    AttributeSet,
    DiagnosticsSink,
    StyleMap,
  },
  syntax::SyntaxError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextTarget {
  All,
  Range(Range<usize>),
  Set(InvalidationSet),
}

impl TextTarget {
  fn into_set(self, len: usize) -> InvalidationSet {
    let mut set = match self {
      TextTarget::All => InvalidationSet::from_range(0..len),
      TextTarget::Range(range) => InvalidationSet::from_range(range),
      TextTarget::Set(set) => set,
    };
    set.clamp(len);
    set
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighlighterState {
  #[default]
  Idle,
  /// Requests are out, nothing is being applied.
  AwaitingTokens,
  /// A delivered result is being written to the buffer.
  Applying,
}

/// Counters since the highlighter was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightStats {
  pub flushes:  usize,
  pub requests: usize,
  /// Requests canceled by a later flush or an edit.
  pub canceled: usize,
  /// Results that arrived for a canceled or unknown request.
  pub stale:    usize,
  /// Results skipped because of a resolver error.
  pub skipped:  usize,
  pub reverted: usize,
  /// `set_attributes` calls.
  pub runs:     usize,
}

#[derive(Debug)]
struct Request {
  range:  Range<usize>,
  handle: TaskHandle,
}

struct Inner {
  coordinator: InvalidationCoordinator,
  resolver:    Arc<dyn TokenResolver>,
  /// Ranges of in-flight requests are disjoint: a flush cancels every
  /// request it overlaps.
  in_flight:   BTreeMap<u64, Request>,
  next_id:     u64,
  phase:       HighlighterState,
  stats:       HighlightStats,
}

impl Inner {
  /// Cancels every request overlapping `set` and adds its range to `set`.
  fn absorb_overlapping(&mut self, set: &mut InvalidationSet) {
    loop {
      let overlapping: Vec<u64> = self
        .in_flight
        .iter()
        .filter(|(_, request)| set.overlaps(&request.range))
        .map(|(&id, _)| id)
        .collect();
      if overlapping.is_empty() {
        return;
      }
      for id in overlapping {
        if let Some(request) = self.in_flight.remove(&id) {
          request.handle.cancel();
          self.stats.canceled += 1;
          set.insert(request.range);
        }
      }
    }
  }

  fn settle(&mut self) {
    self.phase = if self.in_flight.is_empty() {
      HighlighterState::Idle
    } else {
      HighlighterState::AwaitingTokens
    };
  }
}

struct Shared {
  buffer:      Arc<dyn HostBuffer>,
  styles:      StyleMap,
  diagnostics: Arc<dyn DiagnosticsSink>,
  scheduler:   Arc<dyn Scheduler>,
  executor:    Arc<dyn Executor>,
  inner:       Mutex<Inner>,
}

/// Cheap to clone handle. Scheduled jobs and spawned futures only hold weak
/// references, dropping the last handle stops all pending work.
#[derive(Clone)]
pub struct Highlighter {
  shared: Arc<Shared>,
}

impl fmt::Debug for Highlighter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.shared.inner.lock();
    f.debug_struct("Highlighter")
      .field("phase", &inner.phase)
      .field("pending", inner.coordinator.pending())
      .field("in_flight", &inner.in_flight.len())
      .finish_non_exhaustive()
  }
}

impl Highlighter {
  pub fn new(
    buffer: Arc<dyn HostBuffer>,
    resolver: Arc<dyn TokenResolver>,
    styles: StyleMap,
    diagnostics: Arc<dyn DiagnosticsSink>,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn Executor>,
  ) -> Self {
    Self {
      shared: Arc::new(Shared {
        buffer,
        styles,
        diagnostics,
        scheduler,
        executor,
        inner: Mutex::new(Inner {
          coordinator: InvalidationCoordinator::new(),
          resolver,
          in_flight: BTreeMap::new(),
          next_id: 0,
          phase: HighlighterState::Idle,
          stats: HighlightStats::default(),
        }),
      }),
    }
  }

  pub fn state(&self) -> HighlighterState {
    self.shared.inner.lock().phase
  }

  /// No flush pending and no request outstanding.
  pub fn is_idle(&self) -> bool {
    let inner = self.shared.inner.lock();
    inner.phase == HighlighterState::Idle && inner.coordinator.state() == FlushState::Idle
  }

  pub fn stats(&self) -> HighlightStats {
    self.shared.inner.lock().stats.clone()
  }

  pub fn styles(&self) -> &StyleMap {
    &self.shared.styles
  }

  /// Swaps the resolver. Requests already out keep their old resolver.
  pub fn set_resolver(&self, resolver: Arc<dyn TokenResolver>) {
    self.shared.inner.lock().resolver = resolver;
  }

  /// Marks `target` stale. At most one flush is scheduled at a time.
  pub fn invalidate(&self, target: TextTarget) {
    let set = target.into_set(self.shared.buffer.len_chars());
    let decision = self.shared.inner.lock().coordinator.report_set(&set);
    if decision == FlushDecision::Schedule {
      self.schedule_flush();
    }
  }

  /// Called after the host changed the buffer. Pending ranges move with the
  /// edit, and requests whose offsets the edit shifted are canceled and
  /// asked for again.
  pub fn did_change_content(&self, edit: &EditRecord) {
    let decision = {
      let mut inner = self.shared.inner.lock();
      inner.coordinator.apply_edit(edit);
      let shifted: Vec<u64> = inner
        .in_flight
        .iter()
        .filter(|(_, request)| request.range.end > edit.range.start)
        .map(|(&id, _)| id)
        .collect();
      let mut requeue = InvalidationSet::new();
      for id in shifted {
        if let Some(request) = inner.in_flight.remove(&id) {
          request.handle.cancel();
          inner.stats.canceled += 1;
          requeue.insert(edit.map_range(&request.range));
        }
      }
      inner.settle();
      inner.coordinator.report_set(&requeue)
    };
    if decision == FlushDecision::Schedule {
      self.schedule_flush();
    }
  }

  /// Cancels every in-flight request. Results already on their way are
  /// dropped on delivery, pending ranges stay queued.
  pub fn cancel_requests(&self) {
    let mut inner = self.shared.inner.lock();
    let requests = std::mem::take(&mut inner.in_flight);
    for request in requests.into_values() {
      request.handle.cancel();
      inner.stats.canceled += 1;
    }
    inner.settle();
  }

  /// Cancels the requests overlapping `target` and resets it to base
  /// attributes from a scheduled job.
  pub fn revert_to_base(&self, target: TextTarget) {
    let set = target.into_set(self.shared.buffer.len_chars());
    if set.is_empty() {
      return;
    }
    {
      let mut inner = self.shared.inner.lock();
      let mut absorbed = set.clone();
      inner.absorb_overlapping(&mut absorbed);
      inner.stats.reverted += 1;
      inner.settle();
    }
    let weak = Arc::downgrade(&self.shared);
    self.shared.scheduler.schedule(Box::new(move || {
      if let Some(shared) = weak.upgrade() {
        let len = shared.buffer.len_chars();
        let runs: Vec<_> = set
          .iter()
          .map(|range| (range.start.min(len)..range.end.min(len), AttributeSet::base()))
          .filter(|(range, _)| !range.is_empty())
          .collect();
        Highlighter { shared }.apply(runs);
      }
    }));
  }

  fn schedule_flush(&self) {
    let weak = Arc::downgrade(&self.shared);
    self.shared.scheduler.schedule(Box::new(move || {
      if let Some(shared) = weak.upgrade() {
        Highlighter { shared }.flush();
      }
    }));
  }

  fn flush(&self) {
    let len = self.shared.buffer.len_chars();
    let (resolver, requests) = {
      let mut inner = self.shared.inner.lock();
      let mut set = inner.coordinator.take_flush();
      set.clamp(len);
      if set.is_empty() {
        return;
      }
      inner.absorb_overlapping(&mut set);
      set.clamp(len);

      let mut requests = Vec::with_capacity(set.len());
      for range in set.iter() {
        let id = inner.next_id;
        inner.next_id += 1;
        let handle = TaskHandle::new();
        inner.in_flight.insert(id, Request {
          range:  range.clone(),
          handle: handle.clone(),
        });
        requests.push((id, range.clone(), handle));
      }
      inner.stats.flushes += 1;
      inner.stats.requests += requests.len();
      inner.settle();
      (inner.resolver.clone(), requests)
    };

    tracing::trace!(requests = requests.len(), "flushing invalidations");
    for (id, range, handle) in requests {
      let future = resolver.resolve(range, handle.clone());
      let weak = Arc::downgrade(&self.shared);
      self.shared.executor.spawn(
        async move {
          let result = cancelable_future(future, &handle)
            .await
            .unwrap_or(Err(ResolveError::Canceled));
          deliver_later(weak, id, result);
        }
        .boxed(),
      );
    }
  }

  fn deliver(&self, id: u64, result: Result<TokenApplication, ResolveError>) {
    let runs = {
      let mut inner = self.shared.inner.lock();
      let Some(request) = inner.in_flight.remove(&id) else {
        inner.stats.stale += 1;
        return;
      };
      if request.handle.is_canceled() {
        inner.stats.stale += 1;
        inner.settle();
        return;
      }
      let len = self.shared.buffer.len_chars();
      let range = request.range.start.min(len)..request.range.end.min(len);
      let runs = match result {
        Ok(application) => self.flatten(&application, range),
        Err(ResolveError::Syntax(SyntaxError::ParseTimeout { budget })) => {
          tracing::warn!(?budget, ?range, "parse timed out, reverting range to base");
          inner.stats.reverted += 1;
          vec![(range, AttributeSet::base())]
        },
        Err(err) => {
          tracing::debug!(%err, ?range, "skipping range");
          inner.stats.skipped += 1;
          Vec::new()
        },
      };
      inner.phase = HighlighterState::Applying;
      runs
    };
    self.apply(runs);
    self.shared.inner.lock().settle();
  }

  fn apply(&self, runs: Vec<(Range<usize>, AttributeSet)>) {
    for (range, attrs) in &runs {
      self.shared.buffer.set_attributes(attrs, range.clone());
    }
    self.shared.inner.lock().stats.runs += runs.len();
  }

  /// Splits `range` into runs with one attribute set each. Later tokens are
  /// merged over earlier ones. With [`TokenAction::Replace`] the gaps between
  /// tokens become base runs, with [`TokenAction::Merge`] they are left out.
  fn flatten(
    &self,
    application: &TokenApplication,
    range: Range<usize>,
  ) -> Vec<(Range<usize>, AttributeSet)> {
    let tokens: Vec<(Range<usize>, &AttributeSet)> = application
      .tokens
      .iter()
      .filter_map(|token| {
        let (kind, attrs) = self.shared.styles.attributes_for_name(&token.name);
        self.shared.diagnostics.token_observed(&token.name, kind);
        let clipped = token.range.start.max(range.start)..token.range.end.min(range.end);
        (clipped.start < clipped.end).then_some((clipped, attrs))
      })
      .collect();

    let mut bounds = Vec::with_capacity(tokens.len() * 2 + 2);
    bounds.extend([range.start, range.end]);
    for (token, _) in &tokens {
      bounds.extend([token.start, token.end]);
    }
    bounds.sort_unstable();
    bounds.dedup();

    let mut runs: Vec<(Range<usize>, AttributeSet)> = Vec::new();
    for pair in bounds.windows(2) {
      let segment = pair[0]..pair[1];
      let mut attrs = AttributeSet::base();
      let mut covered = false;
      for (token, token_attrs) in &tokens {
        if token.start <= segment.start && segment.end <= token.end {
          attrs.merge(token_attrs);
          covered = true;
        }
      }
      if !covered && application.action == TokenAction::Merge {
        continue;
      }
      match runs.last_mut() {
        Some((last, last_attrs)) if last.end == segment.start && *last_attrs == attrs => {
          last.end = segment.end;
        },
        _ => runs.push((segment, attrs)),
      }
    }
    runs
  }
}

/// Hands a result back to the serial context.
fn deliver_later(shared: Weak<Shared>, id: u64, result: Result<TokenApplication, ResolveError>) {
  let Some(strong) = shared.upgrade() else {
    return;
  };
  let scheduler = strong.scheduler.clone();
  drop(strong);
  scheduler.schedule(Box::new(move || {
    if let Some(shared) = shared.upgrade() {
      Highlighter { shared }.deliver(id, result);
    }
  }));
}
