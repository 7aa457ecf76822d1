//! Activity form with the optional recurrence group.

use tracing::{info, warn};

use crate::activity::{Activity, ActivityPayload};
use crate::church::Branch;
use crate::db::format_recurrence;
use crate::fields::Recurrence;
use crate::forms::validate::*;
use crate::forms::{cycle, SubmitError};
use crate::service::ChurchService;
use crate::tui::input::InputField;

const RECURRENCES: [Recurrence; 4] = [Recurrence::Daily, Recurrence::Weekly, Recurrence::Biweekly, Recurrence::Monthly];

const CROSS_RULES: &[CrossRule] = &[
    CrossRule::NotBefore { earlier: "starts_at", later: "ends_at", message: "End must be after start" },
    CrossRule::RequiredWhen {
        flag: "is_recurring",
        fields: &[("recurrence", &[FieldRule::Required]), ("recurrence_end", &[FieldRule::Required, FieldRule::Date])],
    },
    CrossRule::NotBefore {
        earlier: "starts_at",
        later: "recurrence_end",
        message: "Recurrence must end after the first occurrence",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityField {
    Name,
    Description,
    StartsAt,
    EndsAt,
    Location,
    Branch,
    MaxParticipants,
    IsRecurring,
    Recurrence,
    RecurrenceEnd,
}

impl ActivityField {
    const ALL: [ActivityField; 10] = [
        ActivityField::Name,
        ActivityField::Description,
        ActivityField::StartsAt,
        ActivityField::EndsAt,
        ActivityField::Location,
        ActivityField::Branch,
        ActivityField::MaxParticipants,
        ActivityField::IsRecurring,
        ActivityField::Recurrence,
        ActivityField::RecurrenceEnd,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ActivityField::Name => "name",
            ActivityField::Description => "description",
            ActivityField::StartsAt => "starts_at",
            ActivityField::EndsAt => "ends_at",
            ActivityField::Location => "location",
            ActivityField::Branch => "branch",
            ActivityField::MaxParticipants => "max_participants",
            ActivityField::IsRecurring => "is_recurring",
            ActivityField::Recurrence => "recurrence",
            ActivityField::RecurrenceEnd => "recurrence_end",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActivityField::Name => "Name",
            ActivityField::Description => "Description",
            ActivityField::StartsAt => "Starts (YYYY-MM-DD HH:MM)",
            ActivityField::EndsAt => "Ends (YYYY-MM-DD HH:MM)",
            ActivityField::Location => "Location",
            ActivityField::Branch => "Branch",
            ActivityField::MaxParticipants => "Max Participants",
            ActivityField::IsRecurring => "Recurring",
            ActivityField::Recurrence => "Repeats",
            ActivityField::RecurrenceEnd => "Repeat Until (YYYY-MM-DD)",
        }
    }

    fn rules(self) -> &'static [FieldRule] {
        match self {
            ActivityField::Name => &[FieldRule::Required, FieldRule::MaxLen(200)],
            ActivityField::Description => &[FieldRule::MaxLen(1000)],
            ActivityField::StartsAt | ActivityField::EndsAt => &[FieldRule::Required, FieldRule::DateTime],
            ActivityField::Location => &[FieldRule::MaxLen(200)],
            ActivityField::MaxParticipants => &[FieldRule::Number],
            _ => &[],
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        ActivityField::ALL.into_iter().find(|f| f.key() == key)
    }
}

pub struct ActivityForm {
    pub church_id: u64,
    pub name: InputField,
    pub description: InputField,
    pub starts_at: InputField,
    pub ends_at: InputField,
    pub location: InputField,
    pub branches: Vec<(Option<u64>, String)>,
    pub branch: usize,
    pub max_participants: InputField,
    pub is_recurring: bool,
    pub recurrence: Option<usize>,
    pub recurrence_end: InputField,
    pub current: usize,
    pub errors: FieldErrors,
    pub submitting: bool,
}

impl ActivityForm {
    pub fn new(church_id: u64, branches: &[Branch]) -> Self {
        let mut options = vec![(None, "Whole church".to_string())];
        options.extend(branches.iter().map(|b| (Some(b.id), b.name.clone())));
        let mut form = Self {
            church_id,
            name: InputField::new(),
            description: InputField::new(),
            starts_at: InputField::new(),
            ends_at: InputField::new(),
            location: InputField::new(),
            branches: options,
            branch: 0,
            max_participants: InputField::new(),
            is_recurring: false,
            recurrence: None,
            recurrence_end: InputField::new(),
            current: 0,
            errors: FieldErrors::default(),
            submitting: false,
        };
        form.update_active_field();
        form
    }

    pub fn select_recurrence(&mut self, recurrence: Recurrence) {
        self.is_recurring = true;
        self.recurrence = RECURRENCES.iter().position(|r| *r == recurrence);
    }

    pub fn select_branch(&mut self, branch_id: Option<u64>) -> bool {
        match self.branches.iter().position(|(id, _)| *id == branch_id) {
            Some(pos) => {
                self.branch = pos;
                true
            }
            None => false,
        }
    }

    /// Fields shown; the recurrence group only while recurring is on.
    pub fn visible_fields(&self) -> Vec<ActivityField> {
        use ActivityField as F;
        let mut fields = vec![
            F::Name,
            F::Description,
            F::StartsAt,
            F::EndsAt,
            F::Location,
            F::Branch,
            F::MaxParticipants,
            F::IsRecurring,
        ];
        if self.is_recurring {
            fields.extend([F::Recurrence, F::RecurrenceEnd]);
        }
        fields
    }

    pub fn current_field(&self) -> ActivityField {
        let fields = self.visible_fields();
        fields[self.current.min(fields.len() - 1)]
    }

    pub fn input(&self, field: ActivityField) -> Option<&InputField> {
        Some(match field {
            ActivityField::Name => &self.name,
            ActivityField::Description => &self.description,
            ActivityField::StartsAt => &self.starts_at,
            ActivityField::EndsAt => &self.ends_at,
            ActivityField::Location => &self.location,
            ActivityField::MaxParticipants => &self.max_participants,
            ActivityField::RecurrenceEnd => &self.recurrence_end,
            _ => return None,
        })
    }

    fn input_mut(&mut self, field: ActivityField) -> Option<&mut InputField> {
        Some(match field {
            ActivityField::Name => &mut self.name,
            ActivityField::Description => &mut self.description,
            ActivityField::StartsAt => &mut self.starts_at,
            ActivityField::EndsAt => &mut self.ends_at,
            ActivityField::Location => &mut self.location,
            ActivityField::MaxParticipants => &mut self.max_participants,
            ActivityField::RecurrenceEnd => &mut self.recurrence_end,
            _ => return None,
        })
    }

    pub fn update_active_field(&mut self) {
        let current = self.current_field();
        for field in self.visible_fields() {
            if let Some(input) = self.input_mut(field) {
                input.active = field == current;
            }
        }
    }

    /// Move focus. Returns the field that was left.
    pub fn move_field(&mut self, forward: bool) -> ActivityField {
        let left = self.current_field();
        let count = self.visible_fields().len();
        self.current = cycle(self.current.min(count - 1), count, forward);
        self.update_active_field();
        left
    }

    pub fn handle_char(&mut self, c: char) {
        let field = self.current_field();
        if field == ActivityField::IsRecurring {
            if c == ' ' {
                self.toggle_recurring();
            }
            return;
        }
        if let Some(input) = self.input_mut(field) {
            input.handle_char(c);
        }
    }

    pub fn handle_backspace(&mut self) {
        let field = self.current_field();
        if let Some(input) = self.input_mut(field) {
            input.handle_backspace();
        }
    }

    pub fn handle_left_right(&mut self, right: bool) {
        match self.current_field() {
            ActivityField::Branch => self.branch = cycle(self.branch, self.branches.len(), right),
            ActivityField::IsRecurring => self.toggle_recurring(),
            ActivityField::Recurrence => {
                self.recurrence = Some(match self.recurrence {
                    None => 0,
                    Some(i) => cycle(i, RECURRENCES.len(), right),
                })
            }
            field => {
                if let Some(input) = self.input_mut(field) {
                    if right {
                        input.move_cursor_right()
                    } else {
                        input.move_cursor_left()
                    }
                }
            }
        }
    }

    fn toggle_recurring(&mut self) {
        self.is_recurring = !self.is_recurring;
        if !self.is_recurring {
            self.errors.remove("recurrence");
            self.errors.remove("recurrence_end");
        }
    }

    fn selected_recurrence(&self) -> Option<Recurrence> {
        self.recurrence.and_then(|i| RECURRENCES.get(i).copied())
    }

    pub fn display_value(&self, field: ActivityField) -> String {
        match field {
            ActivityField::Branch => self.branches.get(self.branch).map(|(_, n)| n.clone()).unwrap_or_default(),
            ActivityField::IsRecurring => if self.is_recurring { "[x]" } else { "[ ]" }.to_string(),
            ActivityField::Recurrence => match self.selected_recurrence() {
                Some(r) => format_recurrence(Some(r)).to_string(),
                None => String::new(),
            },
            other => self.input(other).map(|i| i.value.clone()).unwrap_or_default(),
        }
    }

    pub fn validate_field(&mut self, field: ActivityField) -> bool {
        let key = field.key();
        self.errors.remove(key);
        if let Some(msg) = check_rules(&self.display_value(field), field.rules()) {
            self.errors.insert(key, msg);
        }
        for rule in CROSS_RULES.iter().filter(|r| r.fields().contains(&key)) {
            let mut found = FieldErrors::default();
            rule.evaluate(&*self, &mut found);
            if let Some(msg) = found.get(key) {
                self.errors.insert(key, msg.to_string());
            }
        }
        self.errors.get(key).is_none()
    }

    pub fn validate_all(&mut self) -> bool {
        self.errors.clear();
        for field in self.visible_fields() {
            if let Some(msg) = check_rules(&self.display_value(field), field.rules()) {
                self.errors.insert(field.key(), msg);
            }
        }
        let mut cross = FieldErrors::default();
        for rule in CROSS_RULES {
            rule.evaluate(&*self, &mut cross);
        }
        for (field, msg) in cross.iter() {
            if self.errors.get(field).is_none() {
                self.errors.insert(field, msg.to_string());
            }
        }
        self.errors.is_empty()
    }

    /// Normalised payload; `None` while the start or end cannot be parsed.
    pub fn payload(&self) -> Option<ActivityPayload> {
        let starts_at = parse_datetime(&self.starts_at.value)?;
        let ends_at = parse_datetime(&self.ends_at.value)?;
        let (recurrence, recurrence_end) = if self.is_recurring {
            (self.selected_recurrence(), parse_date(&self.recurrence_end.value))
        } else {
            (None, None)
        };
        Some(ActivityPayload {
            church_id: self.church_id,
            branch_id: self.branches.get(self.branch).and_then(|(id, _)| *id),
            name: self.name.trimmed().to_string(),
            description: non_empty(&self.description.value),
            starts_at,
            ends_at,
            location: non_empty(&self.location.value),
            is_recurring: self.is_recurring,
            recurrence,
            recurrence_end,
            max_participants: self.max_participants.trimmed().parse().ok(),
        })
    }

    pub fn submit(&mut self, churches: &mut dyn ChurchService) -> Result<Activity, SubmitError> {
        if self.submitting {
            return Err(SubmitError::InFlight);
        }
        let payload = if self.validate_all() { self.payload() } else { None };
        let Some(payload) = payload else {
            let count = self.errors.len();
            let (key, msg) = self.errors.first(ActivityField::ALL.map(ActivityField::key)).map(|(k, m)| (k, m.to_string())).unwrap_or(("", String::new()));
            let label = ActivityField::from_key(key).map(|f| f.label()).unwrap_or(key);
            return Err(SubmitError::Invalid { count, first: format!("{}: {}", label, msg) });
        };
        self.submitting = true;
        let result = churches.create_activity(payload);
        self.submitting = false;
        match result {
            Ok(activity) => {
                info!(id = activity.id, "activity form submitted");
                Ok(activity)
            }
            Err(e) => {
                warn!(error = %e, "activity submission failed");
                if let Some(field) = e.field().and_then(ActivityField::from_key) {
                    self.errors.insert(field.key(), e.user_message());
                }
                Err(e.into())
            }
        }
    }
}

impl FormValues for ActivityForm {
    fn text(&self, field: &str) -> String {
        ActivityField::from_key(field).map(|f| self.display_value(f)).unwrap_or_default()
    }

    fn flag(&self, field: &str) -> bool {
        field == "is_recurring" && self.is_recurring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::church_payload;
    use crate::db::Database;

    fn filled(church_id: u64) -> ActivityForm {
        let mut form = ActivityForm::new(church_id, &[]);
        form.name.set("Culto de Domingo");
        form.starts_at.set("2025-03-02 19:00");
        form.ends_at.set("2025-03-02 21:00");
        form
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let mut form = filled(1);
        form.ends_at.set("2025-03-02 18:00");
        assert!(!form.validate_all());
        assert_eq!(form.errors.get("ends_at"), Some("End must be after start"));
        assert!(!form.validate_field(ActivityField::EndsAt));
    }

    #[test]
    fn test_recurrence_group_only_validated_when_on() {
        let mut form = filled(1);
        assert!(form.validate_all());
        assert!(!form.visible_fields().contains(&ActivityField::Recurrence));

        form.current = form.visible_fields().iter().position(|f| *f == ActivityField::IsRecurring).unwrap();
        form.handle_char(' ');
        assert!(form.visible_fields().contains(&ActivityField::RecurrenceEnd));
        assert!(!form.validate_all());
        assert_eq!(form.errors.len(), 2);

        form.current = form.visible_fields().iter().position(|f| *f == ActivityField::Recurrence).unwrap();
        form.handle_left_right(true);
        form.recurrence_end.set("2025-06-30");
        assert!(form.validate_all());
        let payload = form.payload().unwrap();
        assert_eq!(payload.recurrence, Some(Recurrence::Daily));
        assert!(payload.recurrence_end.is_some());
    }

    #[test]
    fn test_submit_creates_activity() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut form = filled(church.id);
        form.max_participants.set("120");
        let activity = form.submit(&mut db).unwrap();
        assert_eq!(activity.max_participants, Some(120));
        assert!(!activity.is_recurring);
        assert_eq!(db.list_activities(church.id).unwrap().len(), 1);

        let mut empty = ActivityForm::new(church.id, &[]);
        assert!(matches!(empty.submit(&mut db), Err(SubmitError::Invalid { count: 3, .. })));
    }
}
