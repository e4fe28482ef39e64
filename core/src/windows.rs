//! Daily clock windows that gate ordering, cancellation and feedback.
//!
//! Every window is a closed `HH:MM..=HH:MM` interval in the service's local
//! timezone, evaluated at minute granularity against the current time on each
//! call. The table in [`WindowKind::window`] is the single source of truth:
//! the scheduler derives its trigger times from it as well.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::profile::MealType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockWindow {
    /// Minute of day the window opens (inclusive).
    pub start: u32,
    /// Minute of day the window closes (inclusive).
    pub end: u32,
}

impl ClockWindow {
    pub const fn new(start_hour: u32, start_minute: u32, end_hour: u32, end_minute: u32) -> Self {
        Self {
            start: start_hour * 60 + start_minute,
            end: end_hour * 60 + end_minute,
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = minute_of_day(time);
        self.start <= minute && minute <= self.end
    }

    pub fn start_time(&self) -> NaiveTime {
        naive_time(self.start)
    }

    pub fn end_time(&self) -> NaiveTime {
        naive_time(self.end)
    }

    /// `08:35–09:00` style label for user-facing messages.
    pub fn label(&self) -> String {
        format!(
            "{}–{}",
            self.start_time().format("%H:%M"),
            self.end_time().format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    LunchOrdering,
    DinnerOrdering,
    LunchCancel,
    DinnerCancel,
    LunchFeedback,
    DinnerFeedback,
}

impl WindowKind {
    pub const fn window(self) -> ClockWindow {
        match self {
            WindowKind::LunchOrdering => ClockWindow::new(6, 0, 8, 30),
            WindowKind::DinnerOrdering => ClockWindow::new(14, 0, 16, 30),
            WindowKind::LunchCancel => ClockWindow::new(8, 35, 9, 0),
            WindowKind::DinnerCancel => ClockWindow::new(16, 35, 17, 0),
            WindowKind::LunchFeedback => ClockWindow::new(13, 30, 13, 55),
            WindowKind::DinnerFeedback => ClockWindow::new(20, 30, 21, 30),
        }
    }

    pub const fn ordering(meal: MealType) -> Self {
        match meal {
            MealType::Lunch => WindowKind::LunchOrdering,
            MealType::Dinner => WindowKind::DinnerOrdering,
        }
    }

    pub const fn cancel(meal: MealType) -> Self {
        match meal {
            MealType::Lunch => WindowKind::LunchCancel,
            MealType::Dinner => WindowKind::DinnerCancel,
        }
    }

    pub const fn feedback(meal: MealType) -> Self {
        match meal {
            MealType::Lunch => WindowKind::LunchFeedback,
            MealType::Dinner => WindowKind::DinnerFeedback,
        }
    }
}

/// Pure predicates over wall-clock time. Holds only the timezone the
/// windows are expressed in.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowPolicy {
    tz: Tz,
}

impl TimeWindowPolicy {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.tz)
    }

    pub fn is_open(&self, kind: WindowKind, now: DateTime<Utc>) -> bool {
        kind.window().contains(self.local(now).time())
    }

    /// Meal whose ordering window is open right now, if any.
    pub fn ordering_open(&self, now: DateTime<Utc>) -> Option<MealType> {
        self.open_meal(now, WindowKind::ordering)
    }

    pub fn cancel_open(&self, now: DateTime<Utc>) -> Option<MealType> {
        self.open_meal(now, WindowKind::cancel)
    }

    pub fn feedback_open(&self, now: DateTime<Utc>) -> Option<MealType> {
        self.open_meal(now, WindowKind::feedback)
    }

    fn open_meal(&self, now: DateTime<Utc>, kind: fn(MealType) -> WindowKind) -> Option<MealType> {
        MealType::ALL
            .into_iter()
            .find(|meal| self.is_open(kind(*meal), now))
    }

    /// The cancel window an order placed at `placed_at` belongs to: the first
    /// cancel window that opens after the placement time.
    pub fn cancel_window_for(&self, placed_at: DateTime<Utc>) -> (NaiveDate, MealType) {
        let local = self.local(placed_at);
        let minute = minute_of_day(local.time());
        let date = local.date_naive();
        if minute < WindowKind::LunchCancel.window().start {
            (date, MealType::Lunch)
        } else if minute < WindowKind::DinnerCancel.window().start {
            (date, MealType::Dinner)
        } else {
            (date + Duration::days(1), MealType::Lunch)
        }
    }

    /// Whether an order placed at `placed_at` may be canceled at `now`.
    pub fn can_cancel(&self, placed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (date, meal) = self.cancel_window_for(placed_at);
        let local_now = self.local(now);
        local_now.date_naive() == date && WindowKind::cancel(meal).window().contains(local_now.time())
    }

    /// Converts a local date and minute of day into an absolute instant.
    /// Returns `None` for local times skipped by a DST transition.
    pub fn instant_at(&self, date: NaiveDate, minute: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_time(naive_time(minute));
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Start of the local calendar day containing `now`.
    pub fn start_of_day(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.instant_at(self.local(now).date_naive(), 0)
    }
}

/// Human-readable summary of both cancel windows.
pub fn cancel_windows_label() -> String {
    format!(
        "{} and {}",
        WindowKind::LunchCancel.window().label(),
        WindowKind::DinnerCancel.window().label()
    )
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn naive_time(minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap_or(NaiveTime::MIN)
}
