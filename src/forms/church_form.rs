//! Church create/edit form.

use tracing::{info, warn};

use crate::church::{Address, Church, ChurchPayload, Denomination};
use crate::db::{format_church_status, format_plan};
use crate::fields::{ChurchStatus, Plan};
use crate::forms::validate::*;
use crate::forms::{cycle, SubmitError};
use crate::service::{AddressLookup, ChurchService};
use crate::tui::input::InputField;

const PLANS: [Plan; 4] = [Plan::Free, Plan::Basic, Plan::Professional, Plan::Enterprise];
const STATUSES: [ChurchStatus; 3] = [ChurchStatus::Active, ChurchStatus::Inactive, ChurchStatus::Suspended];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurchField {
    Name,
    ShortName,
    Denomination,
    Cnpj,
    Email,
    Phone,
    ZipCode,
    Street,
    Number,
    Complement,
    Neighborhood,
    City,
    State,
    Plan,
    Status,
}

impl ChurchField {
    pub const ALL: [ChurchField; 15] = [
        ChurchField::Name,
        ChurchField::ShortName,
        ChurchField::Denomination,
        ChurchField::Cnpj,
        ChurchField::Email,
        ChurchField::Phone,
        ChurchField::ZipCode,
        ChurchField::Street,
        ChurchField::Number,
        ChurchField::Complement,
        ChurchField::Neighborhood,
        ChurchField::City,
        ChurchField::State,
        ChurchField::Plan,
        ChurchField::Status,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ChurchField::Name => "name",
            ChurchField::ShortName => "short_name",
            ChurchField::Denomination => "denomination",
            ChurchField::Cnpj => "cnpj",
            ChurchField::Email => "email",
            ChurchField::Phone => "phone",
            ChurchField::ZipCode => "zip_code",
            ChurchField::Street => "street",
            ChurchField::Number => "number",
            ChurchField::Complement => "complement",
            ChurchField::Neighborhood => "neighborhood",
            ChurchField::City => "city",
            ChurchField::State => "state",
            ChurchField::Plan => "plan",
            ChurchField::Status => "status",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChurchField::Name => "Name",
            ChurchField::ShortName => "Short Name",
            ChurchField::Denomination => "Denomination",
            ChurchField::Cnpj => "CNPJ",
            ChurchField::Email => "Email",
            ChurchField::Phone => "Phone",
            ChurchField::ZipCode => "CEP",
            ChurchField::Street => "Street",
            ChurchField::Number => "Number",
            ChurchField::Complement => "Complement",
            ChurchField::Neighborhood => "Neighborhood",
            ChurchField::City => "City",
            ChurchField::State => "State (UF)",
            ChurchField::Plan => "Plan",
            ChurchField::Status => "Status",
        }
    }

    fn rules(self) -> &'static [FieldRule] {
        match self {
            ChurchField::Name => &[FieldRule::Required, FieldRule::MinLen(3), FieldRule::MaxLen(200)],
            ChurchField::ShortName => &[FieldRule::MaxLen(50)],
            ChurchField::Cnpj => &[FieldRule::Cnpj],
            ChurchField::Email => &[FieldRule::Required, FieldRule::Email],
            ChurchField::Phone => &[FieldRule::Phone],
            ChurchField::ZipCode => &[FieldRule::ZipCode],
            ChurchField::City => &[FieldRule::Required, FieldRule::MaxLen(100)],
            ChurchField::State => &[FieldRule::Required, FieldRule::StateCode],
            _ => &[],
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        ChurchField::ALL.into_iter().find(|f| f.key() == key)
    }
}

pub struct ChurchForm {
    pub editing: Option<u64>,
    pub name: InputField,
    pub short_name: InputField,
    pub denominations: Vec<(Option<u64>, String)>,
    pub denomination: usize,
    pub cnpj: InputField,
    pub email: InputField,
    pub phone: InputField,
    pub zip_code: InputField,
    pub street: InputField,
    pub number: InputField,
    pub complement: InputField,
    pub neighborhood: InputField,
    pub city: InputField,
    pub state: InputField,
    pub plan: usize,
    pub status: usize,
    pub current: usize,
    pub errors: FieldErrors,
    pub submitting: bool,
}

impl ChurchForm {
    pub fn new(denominations: &[Denomination]) -> Self {
        let mut options = vec![(None, "Independent".to_string())];
        options.extend(denominations.iter().map(|d| (Some(d.id), d.name.clone())));
        let mut form = Self {
            editing: None,
            name: InputField::new(),
            short_name: InputField::new(),
            denominations: options,
            denomination: 0,
            cnpj: InputField::new(),
            email: InputField::new(),
            phone: InputField::new(),
            zip_code: InputField::new(),
            street: InputField::new(),
            number: InputField::new(),
            complement: InputField::new(),
            neighborhood: InputField::new(),
            city: InputField::new(),
            state: InputField::new(),
            plan: 0,
            status: 0,
            current: 0,
            errors: FieldErrors::default(),
            submitting: false,
        };
        form.update_active_field();
        form
    }

    pub fn edit(church: &Church, denominations: &[Denomination]) -> Self {
        let mut form = Self::new(denominations);
        form.editing = Some(church.id);
        form.name = InputField::with_value(&church.name);
        form.short_name = InputField::with_value(church.short_name.as_deref().unwrap_or(""));
        form.denomination = form.denominations.iter().position(|(id, _)| *id == church.denomination_id).unwrap_or(0);
        form.cnpj = InputField::with_value(church.cnpj.as_deref().unwrap_or(""));
        form.email = InputField::with_value(&church.email);
        form.phone = InputField::with_value(church.phone.as_deref().unwrap_or(""));
        form.zip_code = InputField::with_value(&church.address.zip_code);
        form.street = InputField::with_value(&church.address.street);
        form.number = InputField::with_value(&church.address.number);
        form.complement = InputField::with_value(&church.address.complement);
        form.neighborhood = InputField::with_value(&church.address.neighborhood);
        form.city = InputField::with_value(&church.address.city);
        form.state = InputField::with_value(&church.address.state);
        form.plan = PLANS.iter().position(|p| *p == church.plan).unwrap_or(0);
        form.status = STATUSES.iter().position(|s| *s == church.status).unwrap_or(0);
        form.update_active_field();
        form
    }

    pub fn select_plan(&mut self, plan: Plan) {
        self.plan = PLANS.iter().position(|p| *p == plan).unwrap_or(0);
    }

    pub fn select_status(&mut self, status: ChurchStatus) {
        self.status = STATUSES.iter().position(|s| *s == status).unwrap_or(0);
    }

    /// Returns false when the denomination is not one of the options.
    pub fn select_denomination(&mut self, id: Option<u64>) -> bool {
        match self.denominations.iter().position(|(d, _)| *d == id) {
            Some(pos) => {
                self.denomination = pos;
                true
            }
            None => false,
        }
    }

    pub fn current_field(&self) -> ChurchField {
        ChurchField::ALL[self.current.min(ChurchField::ALL.len() - 1)]
    }

    pub fn input(&self, field: ChurchField) -> Option<&InputField> {
        Some(match field {
            ChurchField::Name => &self.name,
            ChurchField::ShortName => &self.short_name,
            ChurchField::Cnpj => &self.cnpj,
            ChurchField::Email => &self.email,
            ChurchField::Phone => &self.phone,
            ChurchField::ZipCode => &self.zip_code,
            ChurchField::Street => &self.street,
            ChurchField::Number => &self.number,
            ChurchField::Complement => &self.complement,
            ChurchField::Neighborhood => &self.neighborhood,
            ChurchField::City => &self.city,
            ChurchField::State => &self.state,
            _ => return None,
        })
    }

    fn input_mut(&mut self, field: ChurchField) -> Option<&mut InputField> {
        Some(match field {
            ChurchField::Name => &mut self.name,
            ChurchField::ShortName => &mut self.short_name,
            ChurchField::Cnpj => &mut self.cnpj,
            ChurchField::Email => &mut self.email,
            ChurchField::Phone => &mut self.phone,
            ChurchField::ZipCode => &mut self.zip_code,
            ChurchField::Street => &mut self.street,
            ChurchField::Number => &mut self.number,
            ChurchField::Complement => &mut self.complement,
            ChurchField::Neighborhood => &mut self.neighborhood,
            ChurchField::City => &mut self.city,
            ChurchField::State => &mut self.state,
            _ => return None,
        })
    }

    pub fn update_active_field(&mut self) {
        let current = self.current_field();
        for field in ChurchField::ALL {
            if let Some(input) = self.input_mut(field) {
                input.active = field == current;
            }
        }
    }

    /// Move focus. Returns the field that was left.
    pub fn move_field(&mut self, forward: bool) -> ChurchField {
        let left = self.current_field();
        self.current = cycle(self.current, ChurchField::ALL.len(), forward);
        self.update_active_field();
        left
    }

    pub fn handle_char(&mut self, c: char) {
        let field = self.current_field();
        if let Some(input) = self.input_mut(field) {
            input.handle_char(c);
            let mask: Option<fn(&str) -> String> = match field {
                ChurchField::Cnpj => Some(mask_cnpj),
                ChurchField::Phone => Some(mask_phone),
                ChurchField::ZipCode => Some(mask_zip),
                _ => None,
            };
            if let Some(mask) = mask {
                input.apply_mask(mask);
            }
        }
    }

    pub fn handle_backspace(&mut self) {
        let field = self.current_field();
        if let Some(input) = self.input_mut(field) {
            input.handle_backspace();
        }
    }

    pub fn handle_delete(&mut self) {
        let field = self.current_field();
        if let Some(input) = self.input_mut(field) {
            input.handle_delete();
        }
    }

    pub fn handle_left_right(&mut self, right: bool) {
        match self.current_field() {
            ChurchField::Denomination => self.denomination = cycle(self.denomination, self.denominations.len(), right),
            ChurchField::Plan => self.plan = cycle(self.plan, PLANS.len(), right),
            ChurchField::Status => self.status = cycle(self.status, STATUSES.len(), right),
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

    pub fn display_value(&self, field: ChurchField) -> String {
        match field {
            ChurchField::Denomination => self.denominations.get(self.denomination).map(|(_, n)| n.clone()).unwrap_or_default(),
            ChurchField::Plan => format_plan(PLANS[self.plan.min(PLANS.len() - 1)]).to_string(),
            ChurchField::Status => format_church_status(STATUSES[self.status.min(STATUSES.len() - 1)]).to_string(),
            other => self.input(other).map(|i| i.value.clone()).unwrap_or_default(),
        }
    }

    pub fn validate_field(&mut self, field: ChurchField) -> bool {
        self.errors.remove(field.key());
        match check_rules(&self.display_value(field), field.rules()) {
            Some(msg) => {
                self.errors.insert(field.key(), msg);
                false
            }
            None => true,
        }
    }

    pub fn validate_all(&mut self) -> bool {
        self.errors.clear();
        for field in ChurchField::ALL {
            self.validate_field(field);
        }
        self.errors.is_empty()
    }

    /// Ask the service whether CNPJ or email already belong to another church.
    pub fn check_remote(&mut self, field: ChurchField, churches: &dyn ChurchService) {
        if self.errors.get(field.key()).is_some() {
            return;
        }
        let result = match field {
            ChurchField::Cnpj if !self.cnpj.trimmed().is_empty() => churches.cnpj_in_use(self.cnpj.trimmed(), self.editing),
            ChurchField::Email if !self.email.trimmed().is_empty() => {
                churches.church_email_in_use(self.email.trimmed(), self.editing)
            }
            _ => return,
        };
        match result {
            Ok(true) => self.errors.insert(field.key(), format!("This {} is already registered", field.label())),
            Ok(false) => {}
            Err(e) => warn!(field = field.key(), error = %e, "availability check failed"),
        }
    }

    pub fn autofill_address(&mut self, postal: &dyn AddressLookup) -> bool {
        let digits: String = self.zip_code.value.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 8 {
            return false;
        }
        match postal.lookup(&digits) {
            Ok(address) => {
                for (input, value) in [
                    (&mut self.street, address.street),
                    (&mut self.neighborhood, address.neighborhood),
                    (&mut self.city, address.city),
                    (&mut self.state, address.state),
                ] {
                    if !value.is_empty() {
                        input.set(&value);
                    }
                }
                true
            }
            Err(e) => {
                warn!(zip = %digits, error = %e, "address lookup failed");
                false
            }
        }
    }

    pub fn on_blur(&mut self, field: ChurchField, churches: &dyn ChurchService, postal: &dyn AddressLookup) {
        if self.validate_field(field) {
            self.check_remote(field, churches);
            if field == ChurchField::ZipCode {
                self.autofill_address(postal);
            }
        }
    }

    pub fn payload(&self) -> ChurchPayload {
        ChurchPayload {
            denomination_id: self.denominations.get(self.denomination).and_then(|(id, _)| *id),
            name: self.name.trimmed().to_string(),
            short_name: non_empty(&self.short_name.value),
            cnpj: non_empty(&mask_cnpj(&self.cnpj.value)),
            email: self.email.trimmed().to_string(),
            phone: non_empty(&mask_phone(&self.phone.value)),
            address: Address {
                zip_code: normalize_zip(&self.zip_code.value),
                street: self.street.trimmed().to_string(),
                number: self.number.trimmed().to_string(),
                complement: self.complement.trimmed().to_string(),
                neighborhood: self.neighborhood.trimmed().to_string(),
                city: self.city.trimmed().to_string(),
                state: self.state.trimmed().to_uppercase(),
            },
            plan: PLANS[self.plan.min(PLANS.len() - 1)],
            status: STATUSES[self.status.min(STATUSES.len() - 1)],
        }
    }

    pub fn submit(&mut self, churches: &mut dyn ChurchService) -> Result<Church, SubmitError> {
        if self.submitting {
            return Err(SubmitError::InFlight);
        }
        if !self.validate_all() {
            let count = self.errors.len();
            let (key, msg) = self.errors.first(ChurchField::ALL.map(ChurchField::key)).map(|(k, m)| (k, m.to_string())).unwrap_or(("", String::new()));
            let field = ChurchField::from_key(key);
            if let Some(pos) = field.and_then(|f| ChurchField::ALL.iter().position(|x| *x == f)) {
                self.current = pos;
                self.update_active_field();
            }
            let label = field.map(|f| f.label()).unwrap_or(key);
            return Err(SubmitError::Invalid { count, first: format!("{}: {}", label, msg) });
        }
        let payload = self.payload();
        self.submitting = true;
        let result = match self.editing {
            Some(id) => churches.update_church(id, payload),
            None => churches.create_church(payload),
        };
        self.submitting = false;
        match result {
            Ok(church) => {
                info!(id = church.id, "church form submitted");
                Ok(church)
            }
            Err(e) => {
                warn!(error = %e, "church submission failed");
                if let Some(field) = e.field().and_then(ChurchField::from_key) {
                    self.errors.insert(field.key(), e.user_message());
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::church_payload;
    use crate::db::Database;
    use crate::postal::PostalDirectory;

    fn type_into(form: &mut ChurchForm, field: ChurchField, text: &str) {
        form.current = ChurchField::ALL.iter().position(|f| *f == field).unwrap();
        form.update_active_field();
        for c in text.chars() {
            form.handle_char(c);
        }
    }

    #[test]
    fn test_cnpj_mask_and_duplicate_check() {
        let mut db = Database::in_memory();
        let mut existing = church_payload("Betel", "b@x.org");
        existing.cnpj = Some("12.345.678/0001-90".to_string());
        let betel = db.create_church(existing).unwrap();

        let mut form = ChurchForm::new(&[]);
        type_into(&mut form, ChurchField::Cnpj, "12345678000190");
        assert_eq!(form.cnpj.value, "12.345.678/0001-90");
        form.on_blur(ChurchField::Cnpj, &db, &PostalDirectory::default());
        assert_eq!(form.errors.get("cnpj"), Some("This CNPJ is already registered"));

        let mut own = ChurchForm::edit(&betel, &[]);
        own.on_blur(ChurchField::Cnpj, &db, &PostalDirectory::default());
        assert!(own.errors.get("cnpj").is_none());
    }

    #[test]
    fn test_submit_requires_core_fields_then_creates() {
        let mut db = Database::in_memory();
        let mut form = ChurchForm::new(&[]);
        match form.submit(&mut db) {
            Err(SubmitError::Invalid { count, first }) => {
                assert_eq!(count, 4);
                assert!(first.starts_with("Name"), "{}", first);
            }
            other => panic!("expected invalid form, got {:?}", other.map(|c| c.id)),
        }
        assert_eq!(form.current_field(), ChurchField::Name);

        type_into(&mut form, ChurchField::Name, "Igreja Betel");
        type_into(&mut form, ChurchField::Email, "contato@betel.org");
        type_into(&mut form, ChurchField::City, "Campinas");
        type_into(&mut form, ChurchField::State, "sp");
        type_into(&mut form, ChurchField::Phone, "1933334444");
        let church = form.submit(&mut db).unwrap();
        assert_eq!(church.address.state, "SP");
        assert_eq!(church.phone.as_deref(), Some("(19) 3333-4444"));
        assert_eq!(church.plan, Plan::Free);
    }

    #[test]
    fn test_conflict_on_submit_marks_field_and_keeps_values() {
        let mut db = Database::in_memory();
        let betel = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut form = ChurchForm::new(&[]);
        type_into(&mut form, ChurchField::Name, "Outra Igreja");
        type_into(&mut form, ChurchField::Email, &betel.email);
        type_into(&mut form, ChurchField::City, "Campinas");
        type_into(&mut form, ChurchField::State, "SP");

        let err = form.submit(&mut db).unwrap_err();
        assert_eq!(err.toast(), "This email is already registered");
        assert!(form.errors.get("email").is_some());
        assert_eq!(form.name.value, "Outra Igreja");
    }

    #[test]
    fn test_selectors_cycle() {
        let denomination = Denomination {
            id: 4,
            name: "Assembleia".to_string(),
            abbreviation: None,
            headquarters_city: None,
            created_at_utc: 0,
        };
        let mut form = ChurchForm::new(&[denomination]);
        form.current = ChurchField::ALL.iter().position(|f| *f == ChurchField::Denomination).unwrap();
        form.handle_left_right(true);
        assert_eq!(form.payload().denomination_id, Some(4));
        form.current = ChurchField::ALL.iter().position(|f| *f == ChurchField::Status).unwrap();
        form.handle_left_right(false);
        assert_eq!(form.payload().status, ChurchStatus::Suspended);
    }
}
