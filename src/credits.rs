//! Credit ledger: quota gating for lesson-plan and exam-section generation.
//!
//! Two credit systems exist and are mutually exclusive:
//!   - simple: one shared pool refilled every UTC day, each operation has a cost
//!   - complex: a daily counter for lesson plans and an independent cooldown per
//!     exam section
//! A developer override bypasses both.
//!
//! Persisted state is read leniently: anything corrupt is replaced by defaults.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clock::{same_utc_day, Clock};
use crate::config::CreditsCfg;
use crate::domain::ExamPart;
use crate::store::{load_json, save_json, KvStore, KEY_CREDITS_COMPLEX, KEY_CREDITS_SIMPLE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditMode {
  #[default]
  Simple,
  Complex,
}

/// Costly operations gated by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  LessonPlan,
  ExamReading1,
  ExamReading2,
}

impl OperationKind {
  pub const ALL: [OperationKind; 3] = [
    OperationKind::LessonPlan,
    OperationKind::ExamReading1,
    OperationKind::ExamReading2,
  ];

  pub fn for_exam(part: ExamPart) -> Self {
    match part {
      ExamPart::Reading1 => OperationKind::ExamReading1,
      ExamPart::Reading2 => OperationKind::ExamReading2,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleCreditData {
  pub credits: u32,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub last_reset_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounter {
  pub count: u32,
  #[serde(with = "chrono::serde::ts_milliseconds", default)]
  pub last_reset_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStamp {
  #[serde(with = "chrono::serde::ts_milliseconds", default)]
  pub last_used_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplexCreditData {
  pub lesson_plan: DailyCounter,
  pub exam_reading1: CooldownStamp,
  pub exam_reading2: CooldownStamp,
}

/// Live ledger state. Every consumer matches on all three variants.
#[derive(Clone, Debug, PartialEq)]
pub enum CreditState {
  Simple(SimpleCreditData),
  Complex(ComplexCreditData),
  Dev,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSystem {
  Simple,
  Complex,
  Dev,
}

/// Human-facing quota position of one operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Availability {
  Unlimited,
  SharedPool { remaining: u32, daily_limit: u32, cost: u32 },
  DailyQuota { remaining: u32, total: u32 },
  Cooldown { ends_at: DateTime<Utc>, hours_left: i64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Permission {
  pub permitted: bool,
  pub availability: Availability,
  /// Why the operation is refused, when it is.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

/// Read-only view handed to callers after every ledger change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CreditSnapshot {
  pub system: CreditSystem,
  pub operations: BTreeMap<OperationKind, Permission>,
}

impl CreditSnapshot {
  pub fn permission(&self, kind: OperationKind) -> Option<&Permission> {
    self.operations.get(&kind)
  }
}

pub struct CreditLedger {
  store: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  cfg: CreditsCfg,
  mode: CreditMode,
  dev_mode: bool,
  state: CreditState,
}

impl CreditLedger {
  /// Build and immediately initialize from persisted state.
  pub fn new(
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    cfg: CreditsCfg,
    mode: CreditMode,
    dev_mode: bool,
  ) -> Self {
    let mut ledger = Self { store, clock, cfg, mode, dev_mode, state: CreditState::Dev };
    ledger.initialize();
    ledger
  }

  pub fn mode(&self) -> CreditMode { self.mode }

  pub fn dev_mode(&self) -> bool { self.dev_mode }

  pub fn state(&self) -> &CreditState { &self.state }

  fn cooldown(&self) -> Duration {
    Duration::hours(self.cfg.exam_cooldown_hours)
  }

  fn cost(&self, kind: OperationKind) -> u32 {
    match kind {
      OperationKind::LessonPlan => self.cfg.lesson_plan_cost,
      OperationKind::ExamReading1 | OperationKind::ExamReading2 => self.cfg.exam_cost,
    }
  }

  /// Read persisted state, apply day/cooldown rollover, persist any reset.
  #[instrument(level = "debug", skip(self), fields(mode = ?self.mode, dev = self.dev_mode))]
  pub fn initialize(&mut self) -> CreditSnapshot {
    if self.dev_mode {
      self.state = CreditState::Dev;
      return self.snapshot();
    }
    let now = self.clock.now();
    self.state = match self.mode {
      CreditMode::Simple => {
        let data = load_json::<SimpleCreditData>(self.store.as_ref(), KEY_CREDITS_SIMPLE)
          .filter(|d| same_utc_day(d.last_reset_timestamp, now));
        match data {
          Some(d) => CreditState::Simple(d),
          None => {
            let fresh = SimpleCreditData { credits: self.cfg.daily_limit, last_reset_timestamp: now };
            info!(target: "credits", credits = fresh.credits, "Simple credits reset for a new day");
            self.persist_simple(&fresh);
            CreditState::Simple(fresh)
          }
        }
      }
      CreditMode::Complex => {
        let mut data = load_json::<ComplexCreditData>(self.store.as_ref(), KEY_CREDITS_COMPLEX).unwrap_or_default();
        if !same_utc_day(data.lesson_plan.last_reset_timestamp, now) {
          data.lesson_plan = DailyCounter { count: 0, last_reset_timestamp: now };
          info!(target: "credits", "Lesson plan quota reset for a new day");
          self.persist_complex(&data);
        }
        CreditState::Complex(data)
      }
    };
    self.snapshot()
  }

  /// Derive the per-operation view from the current state.
  pub fn snapshot(&self) -> CreditSnapshot {
    let now = self.clock.now();
    let system = match &self.state {
      CreditState::Simple(_) => CreditSystem::Simple,
      CreditState::Complex(_) => CreditSystem::Complex,
      CreditState::Dev => CreditSystem::Dev,
    };
    let operations = OperationKind::ALL
      .iter()
      .map(|&kind| (kind, self.permission_at(kind, now)))
      .collect();
    CreditSnapshot { system, operations }
  }

  fn permission_at(&self, kind: OperationKind, now: DateTime<Utc>) -> Permission {
    match &self.state {
      CreditState::Dev => Permission { permitted: true, availability: Availability::Unlimited, message: None },
      CreditState::Simple(d) => {
        let cost = self.cost(kind);
        let permitted = cost == 0 || d.credits >= cost;
        Permission {
          permitted,
          availability: Availability::SharedPool { remaining: d.credits, daily_limit: self.cfg.daily_limit, cost },
          message: (!permitted).then(|| format!("You need {} credits. Credits reset daily.", cost)),
        }
      }
      CreditState::Complex(d) => match kind {
        OperationKind::LessonPlan => {
          let total = self.cfg.lesson_plan_daily_limit;
          let used = if same_utc_day(d.lesson_plan.last_reset_timestamp, now) { d.lesson_plan.count } else { 0 };
          let remaining = total.saturating_sub(used);
          Permission {
            permitted: remaining > 0,
            availability: Availability::DailyQuota { remaining, total },
            message: (remaining == 0).then(|| format!("You have used your {} daily lesson plan generations.", total)),
          }
        }
        OperationKind::ExamReading1 | OperationKind::ExamReading2 => {
          let stamp = if kind == OperationKind::ExamReading1 { &d.exam_reading1 } else { &d.exam_reading2 };
          let ends_at = stamp.last_used_timestamp + self.cooldown();
          let permitted = now - stamp.last_used_timestamp > self.cooldown();
          let hours_left = hours_until(now, ends_at);
          Permission {
            permitted,
            availability: Availability::Cooldown { ends_at, hours_left },
            message: (!permitted).then(|| format!("On cooldown (~{}h left).", hours_left)),
          }
        }
      },
    }
  }

  /// Entry guard for gated operations. `Err` carries the user-facing reason.
  pub fn check(&self, kind: OperationKind) -> Result<(), String> {
    let p = self.permission_at(kind, self.clock.now());
    if p.permitted {
      Ok(())
    } else {
      Err(p.message.unwrap_or_else(|| "Not enough credits.".into()))
    }
  }

  /// Charge one successful operation.
  #[instrument(level = "debug", skip(self))]
  pub fn deduct(&mut self, kind: OperationKind) -> CreditSnapshot {
    let now = self.clock.now();
    let cost = self.cost(kind);
    let cooldown_kind = matches!(kind, OperationKind::ExamReading1 | OperationKind::ExamReading2);
    let mut persist_simple = None;
    let mut persist_complex = None;

    match &mut self.state {
      CreditState::Dev => {
        debug!(target: "credits", ?kind, "Developer override: nothing deducted");
      }
      CreditState::Simple(d) => {
        d.credits = d.credits.saturating_sub(cost);
        info!(target: "credits", ?kind, cost, remaining = d.credits, "Shared credits deducted");
        persist_simple = Some(d.clone());
      }
      CreditState::Complex(d) => {
        match kind {
          OperationKind::LessonPlan => {
            if !same_utc_day(d.lesson_plan.last_reset_timestamp, now) {
              d.lesson_plan = DailyCounter { count: 0, last_reset_timestamp: now };
            }
            d.lesson_plan.count += 1;
            info!(target: "credits", used = d.lesson_plan.count, "Lesson plan quota used");
          }
          OperationKind::ExamReading1 => d.exam_reading1.last_used_timestamp = now,
          OperationKind::ExamReading2 => d.exam_reading2.last_used_timestamp = now,
        }
        if cooldown_kind {
          info!(target: "credits", ?kind, "Exam cooldown started");
        }
        persist_complex = Some(d.clone());
      }
    }

    if let Some(d) = persist_simple {
      self.persist_simple(&d);
    }
    if let Some(d) = persist_complex {
      self.persist_complex(&d);
    }
    self.snapshot()
  }

  /// Destructive switch between credit systems: the old system's state is
  /// not converted and the new one starts from its defaults.
  #[instrument(level = "info", skip(self))]
  pub fn switch_mode(&mut self, mode: CreditMode) -> CreditSnapshot {
    for key in [KEY_CREDITS_SIMPLE, KEY_CREDITS_COMPLEX] {
      if let Err(e) = self.store.remove(key) {
        warn!(target: "credits", %key, error = %e, "Could not clear credit state");
      }
    }
    self.mode = mode;
    info!(target: "credits", ?mode, "Credit system switched; state reinitialized");
    self.initialize()
  }

  fn persist_simple(&self, d: &SimpleCreditData) {
    if let Err(e) = save_json(self.store.as_ref(), KEY_CREDITS_SIMPLE, d) {
      warn!(target: "credits", error = %e, "Failed to persist simple credits");
    }
  }

  fn persist_complex(&self, d: &ComplexCreditData) {
    if let Err(e) = save_json(self.store.as_ref(), KEY_CREDITS_COMPLEX, d) {
      warn!(target: "credits", error = %e, "Failed to persist complex credits");
    }
  }
}

fn hours_until(now: DateTime<Utc>, ends_at: DateTime<Utc>) -> i64 {
  let secs = (ends_at - now).num_seconds();
  if secs <= 0 { 0 } else { (secs + 3599) / 3600 }
}
