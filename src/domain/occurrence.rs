use crate::domain::models::Task;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Reference time zone used to cut instants into calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCalendar {
    zone: Tz,
}

impl DayCalendar {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.zone).date_naive()
    }
}

impl Default for DayCalendar {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

/// Decides which tasks are active on a calendar day. Stateless apart from the
/// reference calendar, so it is safe to call on every render pass. Bad
/// recurrence input never fails: a non-positive interval counts as daily and
/// an end date before the start date yields no occurrences.
#[derive(Debug, Clone, Copy, Default)]
pub struct OccurrenceCalculator {
    calendar: DayCalendar,
}

impl OccurrenceCalculator {
    pub fn new(calendar: DayCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> DayCalendar {
        self.calendar
    }

    pub fn occurs_on(&self, task: &Task, query: DateTime<Utc>) -> bool {
        self.occurs_on_day(task, self.calendar.day_of(query))
    }

    pub fn occurs_on_day(&self, task: &Task, query_day: NaiveDate) -> bool {
        if !task.is_recurring {
            return query_day == self.calendar.day_of(task.due_date);
        }

        let start_day = self.calendar.day_of(task.start_date);
        if query_day < start_day {
            return false;
        }
        if let Some(end_day) = self.end_day(task) {
            if query_day > end_day {
                return false;
            }
        }

        let diff_days = (query_day - start_day).num_days();
        diff_days % effective_interval(task) == 0
    }

    /// Input order is preserved.
    pub fn tasks_on<'a>(&self, tasks: &'a [Task], query: DateTime<Utc>) -> Vec<&'a Task> {
        let query_day = self.calendar.day_of(query);
        tasks
            .iter()
            .filter(|task| self.occurs_on_day(task, query_day))
            .collect()
    }

    /// Occurrence days of `task` inside the inclusive range `from..=to`.
    pub fn occurrences_between(&self, task: &Task, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        if from > to {
            return Vec::new();
        }

        if !task.is_recurring {
            let due_day = self.calendar.day_of(task.due_date);
            return if due_day >= from && due_day <= to {
                vec![due_day]
            } else {
                Vec::new()
            };
        }

        let last = match self.end_day(task) {
            Some(end_day) if end_day < to => end_day,
            _ => to,
        };
        let step = Duration::days(effective_interval(task));
        let mut days = Vec::new();
        let mut cursor = self.next_occurrence(task, from);
        while let Some(day) = cursor {
            if day > last {
                break;
            }
            days.push(day);
            cursor = day.checked_add_signed(step);
        }
        days
    }

    /// First occurrence on or after `day`, if the task has one.
    pub fn next_occurrence(&self, task: &Task, day: NaiveDate) -> Option<NaiveDate> {
        if !task.is_recurring {
            let due_day = self.calendar.day_of(task.due_date);
            return (due_day >= day).then_some(due_day);
        }

        let start_day = self.calendar.day_of(task.start_date);
        let base = day.max(start_day);
        let interval = effective_interval(task);
        let remainder = (base - start_day).num_days() % interval;
        let candidate = if remainder == 0 {
            base
        } else {
            base.checked_add_signed(Duration::days(interval - remainder))?
        };

        match self.end_day(task) {
            Some(end_day) if candidate > end_day => None,
            _ => Some(candidate),
        }
    }

    /// Number of occurring tasks per day, for calendar badges. Days without
    /// any occurrence are left out.
    pub fn occurrence_counts(
        &self,
        tasks: &[Task],
        from: NaiveDate,
        to: NaiveDate,
    ) -> BTreeMap<NaiveDate, usize> {
        let mut counts = BTreeMap::new();
        for task in tasks {
            for day in self.occurrences_between(task, from, to) {
                *counts.entry(day).or_insert(0) += 1;
            }
        }
        counts
    }

    fn end_day(&self, task: &Task) -> Option<NaiveDate> {
        task.recurring_end_date.map(|end| self.calendar.day_of(end))
    }
}

fn effective_interval(task: &Task) -> i64 {
    if task.recurring_interval_days <= 0 {
        1
    } else {
        i64::from(task.recurring_interval_days)
    }
}
