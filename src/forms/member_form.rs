//! Member form: multi-tab field state, guarded status/function changes,
//! conditional groups and payload normalisation.
//!
//! The form is organised in tabs. Some fields only appear under conditions:
//! the spouse picker while married, and role/login email while system access
//! is being granted. Editing one's own record hides the access tab entirely.

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::church::Branch;
use crate::db::{format_function, format_gender, format_marital_status, format_membership_status, format_role};
use crate::fields::*;
use crate::forms::guard::{ChangeOutcome, Classified, GuardedField, Severity};
use crate::forms::validate::*;
use crate::forms::{cycle, SubmitError};
use crate::member::{ChildLink, Member, MemberPayload, SystemAccess};
use crate::service::{AddressLookup, MemberService};
use crate::session::Actor;
use crate::tui::input::InputField;

pub const SELF_EDIT_NOTICE: &str =
    "You are editing your own record. Your access level can only be changed by another administrator.";

pub const ACCESS_LOCKED_NOTICE: &str =
    "This member's access level is above what you may grant. Only a higher administrator can change it.";

pub const STATUSES: [MembershipStatus; 6] = [
    MembershipStatus::Active,
    MembershipStatus::Inactive,
    MembershipStatus::Disciplined,
    MembershipStatus::Transferred,
    MembershipStatus::Excluded,
    MembershipStatus::Deceased,
];

pub const FUNCTIONS: [MinisterialFunction; 8] = [
    MinisterialFunction::Member,
    MinisterialFunction::Leader,
    MinisterialFunction::Missionary,
    MinisterialFunction::Evangelist,
    MinisterialFunction::Deacon,
    MinisterialFunction::Deaconess,
    MinisterialFunction::Elder,
    MinisterialFunction::Pastor,
];

const MARITAL: [MaritalStatus; 4] = [
    MaritalStatus::Single,
    MaritalStatus::Married,
    MaritalStatus::Divorced,
    MaritalStatus::Widowed,
];

const GENDERS: [Option<Gender>; 3] = [None, Some(Gender::Male), Some(Gender::Female)];

const CROSS_RULES: &[CrossRule] = &[CrossRule::RequiredWhen {
    flag: "create_system_user",
    fields: &[
        ("system_role", &[FieldRule::Required]),
        ("user_email", &[FieldRule::Required, FieldRule::Email]),
    ],
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberTab {
    Personal,
    Contact,
    Address,
    Church,
    Access,
}

impl MemberTab {
    pub const ALL: [MemberTab; 5] = [
        MemberTab::Personal,
        MemberTab::Contact,
        MemberTab::Address,
        MemberTab::Church,
        MemberTab::Access,
    ];

    pub fn title(self) -> &'static str {
        match self {
            MemberTab::Personal => "Personal",
            MemberTab::Contact => "Contact",
            MemberTab::Address => "Address",
            MemberTab::Church => "Church",
            MemberTab::Access => "System Access",
        }
    }

    fn index(self) -> usize {
        MemberTab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberField {
    FullName,
    Cpf,
    BirthDate,
    Gender,
    MaritalStatus,
    Spouse,
    ChildrenCount,
    Children,
    Email,
    Phone,
    ZipCode,
    Street,
    Number,
    Complement,
    Neighborhood,
    City,
    State,
    Branch,
    MembershipStatus,
    MinisterialFunction,
    MembershipDate,
    CreateSystemUser,
    SystemRole,
    UserEmail,
}

impl MemberField {
    const ALL: [MemberField; 24] = [
        MemberField::FullName,
        MemberField::Cpf,
        MemberField::BirthDate,
        MemberField::Gender,
        MemberField::MaritalStatus,
        MemberField::Spouse,
        MemberField::ChildrenCount,
        MemberField::Children,
        MemberField::Email,
        MemberField::Phone,
        MemberField::ZipCode,
        MemberField::Street,
        MemberField::Number,
        MemberField::Complement,
        MemberField::Neighborhood,
        MemberField::City,
        MemberField::State,
        MemberField::Branch,
        MemberField::MembershipStatus,
        MemberField::MinisterialFunction,
        MemberField::MembershipDate,
        MemberField::CreateSystemUser,
        MemberField::SystemRole,
        MemberField::UserEmail,
    ];

    /// Key used for error messages and service error attribution.
    pub fn key(self) -> &'static str {
        match self {
            MemberField::FullName => "full_name",
            MemberField::Cpf => "cpf",
            MemberField::BirthDate => "birth_date",
            MemberField::Gender => "gender",
            MemberField::MaritalStatus => "marital_status",
            MemberField::Spouse => "spouse",
            MemberField::ChildrenCount => "children_count",
            MemberField::Children => "children",
            MemberField::Email => "email",
            MemberField::Phone => "phone",
            MemberField::ZipCode => "zip_code",
            MemberField::Street => "street",
            MemberField::Number => "number",
            MemberField::Complement => "complement",
            MemberField::Neighborhood => "neighborhood",
            MemberField::City => "city",
            MemberField::State => "state",
            MemberField::Branch => "branch",
            MemberField::MembershipStatus => "membership_status",
            MemberField::MinisterialFunction => "ministerial_function",
            MemberField::MembershipDate => "membership_date",
            MemberField::CreateSystemUser => "create_system_user",
            MemberField::SystemRole => "system_role",
            MemberField::UserEmail => "user_email",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        MemberField::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn label(self) -> &'static str {
        match self {
            MemberField::FullName => "Full Name",
            MemberField::Cpf => "CPF",
            MemberField::BirthDate => "Birth Date (YYYY-MM-DD)",
            MemberField::Gender => "Gender",
            MemberField::MaritalStatus => "Marital Status",
            MemberField::Spouse => "Spouse (type to search)",
            MemberField::ChildrenCount => "Number of Children",
            MemberField::Children => "Children (type to search, Enter to link)",
            MemberField::Email => "Email",
            MemberField::Phone => "Phone",
            MemberField::ZipCode => "CEP",
            MemberField::Street => "Street",
            MemberField::Number => "Number",
            MemberField::Complement => "Complement",
            MemberField::Neighborhood => "Neighborhood",
            MemberField::City => "City",
            MemberField::State => "State (UF)",
            MemberField::Branch => "Branch",
            MemberField::MembershipStatus => "Membership Status",
            MemberField::MinisterialFunction => "Ministerial Function",
            MemberField::MembershipDate => "Membership Date (YYYY-MM-DD)",
            MemberField::CreateSystemUser => "Create System User",
            MemberField::SystemRole => "System Role",
            MemberField::UserEmail => "Login Email",
        }
    }

    fn rules(self) -> &'static [FieldRule] {
        match self {
            MemberField::FullName => &[FieldRule::Required, FieldRule::MinLen(3), FieldRule::MaxLen(200)],
            MemberField::Cpf => &[FieldRule::Cpf],
            MemberField::BirthDate | MemberField::MembershipDate => &[FieldRule::Date],
            MemberField::ChildrenCount => &[FieldRule::Number],
            MemberField::Email => &[FieldRule::Email],
            MemberField::Phone => &[FieldRule::Phone],
            MemberField::ZipCode => &[FieldRule::ZipCode],
            MemberField::Street | MemberField::Neighborhood | MemberField::City => &[FieldRule::MaxLen(200)],
            MemberField::Number | MemberField::Complement => &[FieldRule::MaxLen(50)],
            MemberField::State => &[FieldRule::StateCode],
            _ => &[],
        }
    }

    /// Free-text fields backed by an `InputField`.
    pub fn is_text(self) -> bool {
        !matches!(
            self,
            MemberField::Gender
                | MemberField::MaritalStatus
                | MemberField::Branch
                | MemberField::MembershipStatus
                | MemberField::MinisterialFunction
                | MemberField::CreateSystemUser
                | MemberField::SystemRole
        )
    }
}

/// The two confirmation-guarded fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Status,
    Function,
}

/// Spouse reference chosen in the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpouseChoice {
    None,
    /// Married to someone who is not a member of the church.
    NotAMember,
    Member { id: u64, name: String },
}

/// Search box plus candidate list.
#[derive(Debug, Clone)]
pub struct Picker<T> {
    pub query: InputField,
    pub candidates: Vec<T>,
    pub cursor: usize,
}

impl<T> Default for Picker<T> {
    fn default() -> Self {
        Picker { query: InputField::new(), candidates: Vec::new(), cursor: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChildLinkError {
    #[error("a member cannot be linked as their own child")]
    SelfLink,
    #[error("{0} is already linked")]
    Duplicate(String),
}

/// Open option list for a guarded field; nothing is committed while browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chooser {
    pub kind: GuardKind,
    pub index: usize,
}

/// What the confirmation dialog shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingView {
    pub kind: GuardKind,
    pub current: &'static str,
    pub next: &'static str,
    pub severity: Severity,
}

/// Member create/edit form.
pub struct MemberForm {
    /// Record being edited; `None` while creating.
    pub editing: Option<Member>,
    pub church_id: u64,
    pub full_name: InputField,
    pub cpf: InputField,
    pub birth_date: InputField,
    pub gender: usize,
    pub marital_status: usize,
    pub spouse: SpouseChoice,
    pub spouse_picker: Picker<(u64, String)>,
    pub children_count: InputField,
    pub children: Vec<ChildLink>,
    pub child_picker: Picker<ChildLink>,
    pub email: InputField,
    pub phone: InputField,
    pub zip_code: InputField,
    pub street: InputField,
    pub number: InputField,
    pub complement: InputField,
    pub neighborhood: InputField,
    pub city: InputField,
    pub state: InputField,
    pub branches: Vec<(Option<u64>, String)>,
    pub branch: usize,
    pub status: GuardedField<MembershipStatus>,
    pub function: GuardedField<MinisterialFunction>,
    pub status_reason: Option<String>,
    pub function_reason: Option<String>,
    pub membership_date: InputField,
    pub create_system_user: bool,
    pub role_options: Vec<SystemRole>,
    pub system_role: Option<usize>,
    pub user_email: InputField,
    /// Actor is editing their own record; access controls are hidden.
    pub self_edit: bool,
    /// Member holds a role the actor may not grant; access is left untouched.
    pub access_locked: bool,
    pub tab: MemberTab,
    pub current: usize,
    pub chooser: Option<Chooser>,
    /// Guarded field whose confirmation dialog is open.
    pub dialog: Option<GuardKind>,
    pub errors: FieldErrors,
    pub submitting: bool,
}

impl MemberForm {
    /// Empty form for a new member of `church_id`.
    pub fn new(church_id: u64, actor: &Actor, branches: &[Branch]) -> Self {
        let mut branch_options = vec![(None, "Main congregation".to_string())];
        branch_options.extend(branches.iter().map(|b| (Some(b.id), b.name.clone())));
        Self {
            editing: None,
            church_id,
            full_name: InputField::new(),
            cpf: InputField::new(),
            birth_date: InputField::new(),
            gender: 0,
            marital_status: 0,
            spouse: SpouseChoice::None,
            spouse_picker: Picker::default(),
            children_count: InputField::new(),
            children: Vec::new(),
            child_picker: Picker::default(),
            email: InputField::new(),
            phone: InputField::new(),
            zip_code: InputField::new(),
            street: InputField::new(),
            number: InputField::new(),
            complement: InputField::new(),
            neighborhood: InputField::new(),
            city: InputField::new(),
            state: InputField::new(),
            branches: branch_options,
            branch: 0,
            status: GuardedField::unguarded(MembershipStatus::Active),
            function: GuardedField::unguarded(MinisterialFunction::Member),
            status_reason: None,
            function_reason: None,
            membership_date: InputField::with_value(&Local::now().date_naive().to_string()),
            create_system_user: false,
            role_options: actor.grantable_roles(),
            system_role: None,
            user_email: InputField::new(),
            self_edit: false,
            access_locked: false,
            tab: MemberTab::Personal,
            current: 0,
            chooser: None,
            dialog: None,
            errors: FieldErrors::default(),
            submitting: false,
        }
    }

    /// Form populated from an existing member.
    ///
    /// Spouse and children names are fetched so the pickers can show them;
    /// failures there are logged and fall back to the bare id.
    pub fn edit(member: &Member, actor: &Actor, branches: &[Branch], members: &dyn MemberService) -> Self {
        let mut form = Self::new(member.church_id, actor, branches);
        let today = Local::now().date_naive();
        form.full_name = InputField::with_value(&member.full_name);
        form.cpf = InputField::with_value(member.cpf.as_deref().unwrap_or(""));
        form.birth_date = InputField::with_value(&member.birth_date.map(|d| d.to_string()).unwrap_or_default());
        form.gender = GENDERS.iter().position(|g| *g == member.gender).unwrap_or(0);
        form.marital_status = MARITAL.iter().position(|m| *m == member.marital_status).unwrap_or(0);
        form.spouse = match member.spouse_id {
            Some(id) => {
                let name = match members.get_member(id) {
                    Ok(spouse) => spouse.full_name,
                    Err(e) => {
                        warn!(member_id = member.id, spouse_id = id, error = %e, "spouse could not be loaded");
                        format!("Member #{}", id)
                    }
                };
                form.spouse_picker.candidates = vec![(id, name.clone())];
                SpouseChoice::Member { id, name }
            }
            None if member.marital_status == MaritalStatus::Married => SpouseChoice::NotAMember,
            None => SpouseChoice::None,
        };
        form.children_count = InputField::with_value(&member.children_count.map(|c| c.to_string()).unwrap_or_default());
        form.children = member
            .children_ids
            .iter()
            .map(|&id| match members.get_member(id) {
                Ok(child) => ChildLink { id, age: child.age_on(today), full_name: child.full_name },
                Err(e) => {
                    warn!(member_id = member.id, child_id = id, error = %e, "child could not be loaded");
                    ChildLink { id, full_name: format!("Member #{}", id), age: None }
                }
            })
            .collect();
        form.email = InputField::with_value(member.email.as_deref().unwrap_or(""));
        form.phone = InputField::with_value(member.phone.as_deref().unwrap_or(""));
        form.zip_code = InputField::with_value(&member.address.zip_code);
        form.street = InputField::with_value(&member.address.street);
        form.number = InputField::with_value(&member.address.number);
        form.complement = InputField::with_value(&member.address.complement);
        form.neighborhood = InputField::with_value(&member.address.neighborhood);
        form.city = InputField::with_value(&member.address.city);
        form.state = InputField::with_value(&member.address.state);
        form.branch = form.branches.iter().position(|(id, _)| *id == member.branch_id).unwrap_or(0);
        form.status = GuardedField::guarded(member.membership_status);
        form.function = GuardedField::guarded(member.ministerial_function);
        form.membership_date = InputField::with_value(&member.membership_date.map(|d| d.to_string()).unwrap_or_default());
        form.create_system_user = member.user_id.is_some();
        form.system_role = member.system_role.and_then(|r| form.role_options.iter().position(|o| *o == r));
        form.user_email = InputField::with_value(member.user_email.as_deref().unwrap_or(""));
        form.self_edit = actor.is_self(member);
        form.access_locked = member.system_role.is_some_and(|r| !actor.can_grant(r));
        form.editing = Some(member.clone());
        form.update_active_field();
        form
    }

    pub fn is_edit(&self) -> bool {
        self.editing.is_some()
    }

    fn own_id(&self) -> Option<u64> {
        self.editing.as_ref().map(|m| m.id)
    }

    pub fn marital(&self) -> MaritalStatus {
        MARITAL[self.marital_status.min(MARITAL.len() - 1)]
    }

    pub fn access_enabled(&self) -> bool {
        self.create_system_user && self.access_notice().is_none()
    }

    /// Why the access section is hidden, if it is.
    pub fn access_notice(&self) -> Option<&'static str> {
        if self.self_edit {
            Some(SELF_EDIT_NOTICE)
        } else if self.access_locked {
            Some(ACCESS_LOCKED_NOTICE)
        } else {
            None
        }
    }

    pub fn selected_role(&self) -> Option<SystemRole> {
        self.system_role.and_then(|i| self.role_options.get(i).copied())
    }

    pub fn select_gender(&mut self, gender: Option<Gender>) {
        self.gender = GENDERS.iter().position(|g| *g == gender).unwrap_or(0);
    }

    pub fn select_marital(&mut self, status: MaritalStatus) {
        self.marital_status = MARITAL.iter().position(|m| *m == status).unwrap_or(0);
        if status == MaritalStatus::Married && self.spouse == SpouseChoice::None {
            self.spouse = SpouseChoice::NotAMember;
        } else if status != MaritalStatus::Married {
            self.spouse = SpouseChoice::None;
        }
    }

    /// Returns false when the branch does not belong to the church.
    pub fn select_branch(&mut self, branch_id: Option<u64>) -> bool {
        match self.branches.iter().position(|(id, _)| *id == branch_id) {
            Some(pos) => {
                self.branch = pos;
                true
            }
            None => false,
        }
    }

    /// Returns false when the actor may not grant `role`.
    pub fn select_role(&mut self, role: SystemRole) -> bool {
        match self.role_options.iter().position(|r| *r == role) {
            Some(pos) => {
                self.system_role = Some(pos);
                true
            }
            None => false,
        }
    }

    /// Fields shown on a tab given the current conditional state.
    pub fn visible_fields(&self, tab: MemberTab) -> Vec<MemberField> {
        use MemberField as F;
        match tab {
            MemberTab::Personal => {
                let mut fields = vec![F::FullName, F::Cpf, F::BirthDate, F::Gender, F::MaritalStatus];
                if self.marital() == MaritalStatus::Married {
                    fields.push(F::Spouse);
                }
                fields.extend([F::ChildrenCount, F::Children]);
                fields
            }
            MemberTab::Contact => vec![F::Email, F::Phone],
            MemberTab::Address => vec![F::ZipCode, F::Street, F::Number, F::Complement, F::Neighborhood, F::City, F::State],
            MemberTab::Church => vec![F::Branch, F::MembershipStatus, F::MinisterialFunction, F::MembershipDate],
            MemberTab::Access => {
                if self.access_notice().is_some() {
                    Vec::new()
                } else if self.create_system_user {
                    vec![F::CreateSystemUser, F::SystemRole, F::UserEmail]
                } else {
                    vec![F::CreateSystemUser]
                }
            }
        }
    }

    pub fn current_field(&self) -> Option<MemberField> {
        let fields = self.visible_fields(self.tab);
        fields.get(self.current.min(fields.len().saturating_sub(1))).copied()
    }

    fn all_text_fields_mut(&mut self) -> Vec<&mut InputField> {
        vec![
            &mut self.full_name,
            &mut self.cpf,
            &mut self.birth_date,
            &mut self.spouse_picker.query,
            &mut self.children_count,
            &mut self.child_picker.query,
            &mut self.email,
            &mut self.phone,
            &mut self.zip_code,
            &mut self.street,
            &mut self.number,
            &mut self.complement,
            &mut self.neighborhood,
            &mut self.city,
            &mut self.state,
            &mut self.membership_date,
            &mut self.user_email,
        ]
    }

    pub fn input(&self, field: MemberField) -> Option<&InputField> {
        Some(match field {
            MemberField::FullName => &self.full_name,
            MemberField::Cpf => &self.cpf,
            MemberField::BirthDate => &self.birth_date,
            MemberField::Spouse => &self.spouse_picker.query,
            MemberField::ChildrenCount => &self.children_count,
            MemberField::Children => &self.child_picker.query,
            MemberField::Email => &self.email,
            MemberField::Phone => &self.phone,
            MemberField::ZipCode => &self.zip_code,
            MemberField::Street => &self.street,
            MemberField::Number => &self.number,
            MemberField::Complement => &self.complement,
            MemberField::Neighborhood => &self.neighborhood,
            MemberField::City => &self.city,
            MemberField::State => &self.state,
            MemberField::MembershipDate => &self.membership_date,
            MemberField::UserEmail => &self.user_email,
            _ => return None,
        })
    }

    fn input_mut(&mut self, field: MemberField) -> Option<&mut InputField> {
        Some(match field {
            MemberField::FullName => &mut self.full_name,
            MemberField::Cpf => &mut self.cpf,
            MemberField::BirthDate => &mut self.birth_date,
            MemberField::Spouse => &mut self.spouse_picker.query,
            MemberField::ChildrenCount => &mut self.children_count,
            MemberField::Children => &mut self.child_picker.query,
            MemberField::Email => &mut self.email,
            MemberField::Phone => &mut self.phone,
            MemberField::ZipCode => &mut self.zip_code,
            MemberField::Street => &mut self.street,
            MemberField::Number => &mut self.number,
            MemberField::Complement => &mut self.complement,
            MemberField::Neighborhood => &mut self.neighborhood,
            MemberField::City => &mut self.city,
            MemberField::State => &mut self.state,
            MemberField::MembershipDate => &mut self.membership_date,
            MemberField::UserEmail => &mut self.user_email,
            _ => return None,
        })
    }

    /// Update which field is currently active for editing.
    pub fn update_active_field(&mut self) {
        for field in self.all_text_fields_mut() {
            field.active = false;
        }
        if let Some(field) = self.current_field() {
            if let Some(input) = self.input_mut(field) {
                input.active = true;
            }
        }
    }

    /// Move to the next field. Returns the field that was left.
    pub fn next_field(&mut self) -> Option<MemberField> {
        let left = self.current_field();
        let count = self.visible_fields(self.tab).len();
        self.current = cycle(self.current.min(count.saturating_sub(1)), count, true);
        self.chooser = None;
        self.update_active_field();
        left
    }

    /// Move to the previous field. Returns the field that was left.
    pub fn prev_field(&mut self) -> Option<MemberField> {
        let left = self.current_field();
        let count = self.visible_fields(self.tab).len();
        self.current = cycle(self.current.min(count.saturating_sub(1)), count, false);
        self.chooser = None;
        self.update_active_field();
        left
    }

    /// Switch tab. Returns the field that was left.
    pub fn switch_tab(&mut self, forward: bool) -> Option<MemberField> {
        let left = self.current_field();
        let idx = cycle(self.tab.index(), MemberTab::ALL.len(), forward);
        self.tab = MemberTab::ALL[idx];
        self.current = 0;
        self.chooser = None;
        self.update_active_field();
        left
    }

    /// Jump to the tab holding `field` and focus it.
    pub fn focus(&mut self, field: MemberField) {
        for tab in MemberTab::ALL {
            if let Some(pos) = self.visible_fields(tab).iter().position(|f| *f == field) {
                self.tab = tab;
                self.current = pos;
                self.update_active_field();
                return;
            }
        }
    }

    /// Handle character input for the currently active field.
    pub fn handle_char(&mut self, c: char) {
        let Some(field) = self.current_field() else { return };
        if field == MemberField::CreateSystemUser {
            if c == ' ' {
                self.toggle_access();
            }
            return;
        }
        if let Some(input) = self.input_mut(field) {
            input.handle_char(c);
            let mask: Option<fn(&str) -> String> = match field {
                MemberField::Phone => Some(mask_phone),
                MemberField::Cpf => Some(mask_cpf),
                MemberField::ZipCode => Some(mask_zip),
                _ => None,
            };
            if let Some(mask) = mask {
                input.apply_mask(mask);
            }
        }
    }

    /// Handle backspace; on an empty children search it unlinks the last child.
    pub fn handle_backspace(&mut self) {
        let Some(field) = self.current_field() else { return };
        if field == MemberField::Children && self.child_picker.query.value.is_empty() {
            self.children.pop();
            return;
        }
        if let Some(input) = self.input_mut(field) {
            input.handle_backspace();
        }
    }

    pub fn handle_delete(&mut self) {
        if let Some(field) = self.current_field() {
            if let Some(input) = self.input_mut(field) {
                input.handle_delete();
            }
        }
    }

    /// Handle left/right arrows: cursor movement, selector changes, or browsing a
    /// guarded field's options.
    pub fn handle_left_right(&mut self, right: bool) {
        let Some(field) = self.current_field() else { return };
        match field {
            MemberField::Gender => self.gender = cycle(self.gender, GENDERS.len(), right),
            MemberField::MaritalStatus => {
                self.marital_status = cycle(self.marital_status, MARITAL.len(), right);
                if self.marital() != MaritalStatus::Married {
                    self.spouse = SpouseChoice::None;
                } else if self.spouse == SpouseChoice::None {
                    self.spouse = SpouseChoice::NotAMember;
                }
            }
            MemberField::Branch => self.branch = cycle(self.branch, self.branches.len(), right),
            MemberField::CreateSystemUser => self.toggle_access(),
            MemberField::SystemRole => {
                if !self.role_options.is_empty() {
                    self.system_role = Some(match self.system_role {
                        None => 0,
                        Some(i) => cycle(i, self.role_options.len(), right),
                    });
                }
            }
            MemberField::MembershipStatus => self.chooser_step(GuardKind::Status, right),
            MemberField::MinisterialFunction => self.chooser_step(GuardKind::Function, right),
            MemberField::Spouse => self.cycle_spouse(right),
            MemberField::Children => {
                self.child_picker.cursor = cycle(self.child_picker.cursor, self.child_picker.candidates.len(), right)
            }
            _ => {
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

    fn toggle_access(&mut self) {
        if self.access_notice().is_some() {
            return;
        }
        self.create_system_user = !self.create_system_user;
        if !self.create_system_user {
            self.errors.remove("system_role");
            self.errors.remove("user_email");
        }
    }

    fn cycle_spouse(&mut self, right: bool) {
        let mut options = vec![SpouseChoice::NotAMember];
        options.extend(
            self.spouse_picker
                .candidates
                .iter()
                .map(|(id, name)| SpouseChoice::Member { id: *id, name: name.clone() }),
        );
        let pos = options.iter().position(|o| *o == self.spouse).unwrap_or(0);
        self.spouse = options[cycle(pos, options.len(), right)].clone();
    }

    /// Refresh spouse candidates from the search text, keeping the current pick.
    pub fn refresh_spouse_candidates(&mut self, members: &dyn MemberService) {
        match members.search_members(self.church_id, self.spouse_picker.query.trimmed(), self.own_id()) {
            Ok(found) => {
                let mut candidates: Vec<(u64, String)> = found.into_iter().map(|m| (m.id, m.full_name)).collect();
                if let SpouseChoice::Member { id, name } = &self.spouse {
                    if !candidates.iter().any(|(cid, _)| cid == id) {
                        candidates.insert(0, (*id, name.clone()));
                    }
                }
                self.spouse_picker.candidates = candidates;
                self.spouse_picker.cursor = 0;
            }
            Err(e) => warn!(error = %e, "spouse search failed"),
        }
    }

    /// Refresh child candidates from the search text.
    pub fn refresh_child_candidates(&mut self, members: &dyn MemberService) {
        let today = Local::now().date_naive();
        match members.search_members(self.church_id, self.child_picker.query.trimmed(), self.own_id()) {
            Ok(found) => {
                self.child_picker.candidates = found
                    .into_iter()
                    .filter(|m| !self.children.iter().any(|c| c.id == m.id))
                    .map(|m| ChildLink { id: m.id, age: m.age_on(today), full_name: m.full_name })
                    .collect();
                self.child_picker.cursor = 0;
            }
            Err(e) => warn!(error = %e, "children search failed"),
        }
    }

    /// Add a child to the working set.
    pub fn add_child(&mut self, link: ChildLink) -> Result<(), ChildLinkError> {
        if Some(link.id) == self.own_id() {
            return Err(ChildLinkError::SelfLink);
        }
        if self.children.iter().any(|c| c.id == link.id) {
            return Err(ChildLinkError::Duplicate(link.full_name));
        }
        self.children.push(link);
        Ok(())
    }

    /// Link the highlighted child candidate.
    pub fn add_highlighted_child(&mut self) -> Result<Option<String>, ChildLinkError> {
        let Some(link) = self.child_picker.candidates.get(self.child_picker.cursor).cloned() else {
            return Ok(None);
        };
        let name = link.full_name.clone();
        self.add_child(link)?;
        self.child_picker.candidates.retain(|c| c.full_name != name);
        self.child_picker.cursor = 0;
        self.child_picker.query.set("");
        Ok(Some(name))
    }

    /// Unlink the most recently linked child, returning its name.
    pub fn unlink_last_child(&mut self) -> Option<String> {
        self.children.pop().map(|c| c.full_name)
    }

    /// Open the option list for a guarded field, positioned on its committed value.
    pub fn open_chooser(&mut self, kind: GuardKind) {
        let index = match kind {
            GuardKind::Status => STATUSES.iter().position(|s| *s == self.status.value()).unwrap_or(0),
            GuardKind::Function => FUNCTIONS.iter().position(|f| *f == self.function.value()).unwrap_or(0),
        };
        self.chooser = Some(Chooser { kind, index });
    }

    fn chooser_step(&mut self, kind: GuardKind, forward: bool) {
        if self.chooser.map(|c| c.kind) != Some(kind) {
            self.open_chooser(kind);
        }
        if let Some(chooser) = self.chooser.as_mut() {
            let len = match kind {
                GuardKind::Status => STATUSES.len(),
                GuardKind::Function => FUNCTIONS.len(),
            };
            chooser.index = cycle(chooser.index, len, forward);
        }
    }

    pub fn close_chooser(&mut self) {
        self.chooser = None;
    }

    /// Propose the highlighted option of the open chooser.
    pub fn chooser_pick(&mut self) -> Option<ChangeOutcome> {
        let chooser = self.chooser.take()?;
        Some(match chooser.kind {
            GuardKind::Status => self.request_status(STATUSES[chooser.index]),
            GuardKind::Function => self.request_function(FUNCTIONS[chooser.index]),
        })
    }

    pub fn request_status(&mut self, value: MembershipStatus) -> ChangeOutcome {
        let outcome = self.status.request_change(value);
        if outcome == ChangeOutcome::NeedsConfirmation {
            self.dialog = Some(GuardKind::Status);
        }
        debug!(?value, ?outcome, "status change requested");
        outcome
    }

    pub fn request_function(&mut self, value: MinisterialFunction) -> ChangeOutcome {
        let outcome = self.function.request_change(value);
        if outcome == ChangeOutcome::NeedsConfirmation {
            self.dialog = Some(GuardKind::Function);
        }
        debug!(?value, ?outcome, "function change requested");
        outcome
    }

    /// Contents of the open confirmation dialog.
    pub fn pending_view(&self) -> Option<PendingView> {
        match self.dialog? {
            GuardKind::Status => self.status.pending().map(|p| PendingView {
                kind: GuardKind::Status,
                current: format_membership_status(p.current),
                next: format_membership_status(p.next),
                severity: p.next.severity(),
            }),
            GuardKind::Function => self.function.pending().map(|p| PendingView {
                kind: GuardKind::Function,
                current: format_function(p.current),
                next: format_function(p.next),
                severity: p.next.severity(),
            }),
        }
    }

    /// After one dialog closes, show the other guarded field's change if it is
    /// still waiting.
    fn reopen_waiting(&mut self) {
        self.dialog = if self.status.pending().is_some() {
            Some(GuardKind::Status)
        } else if self.function.pending().is_some() {
            Some(GuardKind::Function)
        } else {
            None
        };
    }

    /// Accept the pending change of the open dialog.
    pub fn confirm_dialog(&mut self, reason: Option<String>) {
        match self.dialog.take() {
            Some(GuardKind::Status) => {
                if self.status.confirm().is_some() {
                    self.status_reason = reason;
                }
            }
            Some(GuardKind::Function) => {
                if self.function.confirm().is_some() {
                    self.function_reason = reason;
                }
            }
            None => {}
        }
        self.reopen_waiting();
    }

    /// Discard the pending change of the open dialog.
    pub fn cancel_dialog(&mut self) {
        match self.dialog.take() {
            Some(GuardKind::Status) => self.status.cancel(),
            Some(GuardKind::Function) => self.function.cancel(),
            None => {}
        }
        self.reopen_waiting();
    }

    /// Display text for selector-style fields.
    pub fn display_value(&self, field: MemberField) -> String {
        match field {
            MemberField::Gender => format_gender(GENDERS[self.gender.min(GENDERS.len() - 1)]).to_string(),
            MemberField::MaritalStatus => format_marital_status(self.marital()).to_string(),
            MemberField::Branch => self.branches.get(self.branch).map(|(_, n)| n.clone()).unwrap_or_default(),
            MemberField::MembershipStatus => format_membership_status(self.status.value()).to_string(),
            MemberField::MinisterialFunction => format_function(self.function.value()).to_string(),
            MemberField::CreateSystemUser => if self.create_system_user { "[x]" } else { "[ ]" }.to_string(),
            MemberField::SystemRole => self.selected_role().map(format_role).unwrap_or("Select a role").to_string(),
            MemberField::Spouse => match &self.spouse {
                SpouseChoice::None => "-".to_string(),
                SpouseChoice::NotAMember => "Not a member".to_string(),
                SpouseChoice::Member { name, .. } => name.clone(),
            },
            MemberField::Children => self
                .children
                .iter()
                .map(|c| match c.age {
                    Some(age) => format!("{} ({})", c.full_name, age),
                    None => c.full_name.clone(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            other => self.input(other).map(|i| i.value.clone()).unwrap_or_default(),
        }
    }

    /// Validate one field against its base rules and any cross rule that owns it.
    pub fn validate_field(&mut self, field: MemberField) -> bool {
        let key = field.key();
        self.errors.remove(key);
        if let Some(msg) = check_rules(&self.text(key), field.rules()) {
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

    /// Validate every visible field, then the cross-field rules.
    pub fn validate_all(&mut self) -> bool {
        self.errors.clear();
        let fields: Vec<MemberField> = MemberTab::ALL.iter().flat_map(|t| self.visible_fields(*t)).collect();
        for field in fields {
            if let Some(msg) = check_rules(&self.text(field.key()), field.rules()) {
                self.errors.insert(field.key(), msg);
            }
        }
        let mut cross = FieldErrors::default();
        for rule in CROSS_RULES {
            rule.evaluate(&*self, &mut cross);
        }
        for (field, msg) in cross.iter() {
            self.errors.insert(field, msg.to_string());
        }
        self.errors.is_empty()
    }

    /// Server round-trip checks for unique values.
    pub fn check_remote(&mut self, field: MemberField, members: &dyn MemberService) {
        if !matches!(field, MemberField::Email | MemberField::UserEmail) || self.errors.get(field.key()).is_some() {
            return;
        }
        let value = self.text(field.key());
        if value.trim().is_empty() {
            return;
        }
        match members.email_in_use(&value, self.own_id()) {
            Ok(true) => self.errors.insert(field.key(), "This email is already registered".to_string()),
            Ok(false) => {}
            Err(e) => warn!(field = field.key(), error = %e, "email availability check failed"),
        }
    }

    /// Fill street, neighborhood, city and state from the CEP. Best effort.
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

    /// Everything that happens when the cursor leaves a field.
    pub fn on_blur(&mut self, field: MemberField, members: &dyn MemberService, postal: &dyn AddressLookup) {
        if self.validate_field(field) {
            self.check_remote(field, members);
            if field == MemberField::ZipCode {
                self.autofill_address(postal);
            }
        }
    }

    /// Normalised payload. Call after `validate_all` succeeded.
    pub fn payload(&self) -> MemberPayload {
        let cpf = non_empty(&mask_cpf(&self.cpf.value));
        let phone = non_empty(&mask_phone(&self.phone.value));
        let spouse_id = match (&self.spouse, self.marital()) {
            (SpouseChoice::Member { id, .. }, MaritalStatus::Married) => Some(*id),
            _ => None,
        };
        let children_ids: Vec<u64> = self.children.iter().map(|c| c.id).collect();
        let children_count = match self.children_count.trimmed().parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) if !children_ids.is_empty() => Some(children_ids.len() as u32),
            Err(_) => None,
        };
        let access = if self.access_notice().is_some() {
            None
        } else if self.create_system_user {
            Some(SystemAccess {
                create_system_user: true,
                system_role: self.selected_role(),
                user_email: non_empty(&self.user_email.value),
            })
        } else {
            Some(SystemAccess { create_system_user: false, system_role: None, user_email: None })
        };
        MemberPayload {
            church_id: self.church_id,
            branch_id: self.branches.get(self.branch).and_then(|(id, _)| *id),
            full_name: self.full_name.trimmed().to_string(),
            cpf,
            birth_date: parse_date(&self.birth_date.value),
            gender: GENDERS[self.gender.min(GENDERS.len() - 1)],
            email: non_empty(&self.email.value),
            phone,
            address: crate::church::Address {
                zip_code: normalize_zip(&self.zip_code.value),
                street: self.street.trimmed().to_string(),
                number: self.number.trimmed().to_string(),
                complement: self.complement.trimmed().to_string(),
                neighborhood: self.neighborhood.trimmed().to_string(),
                city: self.city.trimmed().to_string(),
                state: self.state.trimmed().to_uppercase(),
            },
            marital_status: self.marital(),
            spouse_id,
            children_ids,
            children_count,
            membership_status: self.status.value(),
            ministerial_function: self.function.value(),
            membership_date: parse_date(&self.membership_date.value),
            status_change_reason: if self.status.is_dirty() { self.status_reason.clone() } else { None },
            function_change_reason: if self.function.is_dirty() { self.function_reason.clone() } else { None },
            access,
        }
    }

    /// Validate, normalise and send to the member service.
    ///
    /// On failure every field keeps its value so the user can retry; a service
    /// error attributed to a field is shown on that field.
    pub fn submit(&mut self, members: &mut dyn MemberService, actor: &str) -> Result<Member, SubmitError> {
        if self.submitting {
            return Err(SubmitError::InFlight);
        }
        if !self.validate_all() {
            let count = self.errors.len();
            let (key, msg) = self.errors.first(MemberField::ALL.map(MemberField::key)).map(|(k, m)| (k, m.to_string())).unwrap_or(("", String::new()));
            if let Some(field) = MemberField::from_key(key) {
                self.focus(field);
            }
            let label = MemberField::from_key(key).map(|f| f.label()).unwrap_or(key);
            return Err(SubmitError::Invalid { count, first: format!("{}: {}", label, msg) });
        }
        let payload = self.payload();
        self.submitting = true;
        let result = match self.editing.as_ref() {
            Some(existing) => members.update_member(existing.id, payload, actor),
            None => members.create_member(payload, actor),
        };
        self.submitting = false;
        match result {
            Ok(member) => {
                info!(id = member.id, edit = self.is_edit(), "member form submitted");
                Ok(member)
            }
            Err(e) => {
                warn!(error = %e, "member submission failed");
                if let Some(field) = e.field().and_then(MemberField::from_key) {
                    self.errors.insert(field.key(), e.user_message());
                }
                Err(e.into())
            }
        }
    }
}

impl FormValues for MemberForm {
    fn text(&self, field: &str) -> String {
        match MemberField::from_key(field) {
            Some(MemberField::SystemRole) => self.selected_role().map(|r| format_role(r).to_string()).unwrap_or_default(),
            Some(f) if f.is_text() => self.input(f).map(|i| i.value.clone()).unwrap_or_default(),
            Some(f) => self.display_value(f),
            None => String::new(),
        }
    }

    fn flag(&self, field: &str) -> bool {
        match field {
            "create_system_user" => self.access_enabled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::church::Address;
    use crate::db::tests::{church_payload, member_payload};
    use crate::db::Database;
    use crate::error::{ServiceError, ServiceResult};
    use crate::member::MembershipStatusLog;
    use crate::postal::PostalDirectory;
    use crate::service::{ChurchService, MemberQuery, Page};

    fn setup() -> (Database, Member) {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut payload = member_payload(church.id, "Maria da Silva");
        payload.email = Some("maria@x.org".to_string());
        let member = db.create_member(payload, "admin").unwrap();
        (db, member)
    }

    fn type_into(form: &mut MemberForm, field: MemberField, text: &str) {
        form.focus(field);
        for c in text.chars() {
            form.handle_char(c);
        }
    }

    #[test]
    fn test_status_change_needs_confirmation_when_editing() {
        let (db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);

        assert_eq!(form.request_status(MembershipStatus::Deceased), ChangeOutcome::NeedsConfirmation);
        assert_eq!(form.display_value(MemberField::MembershipStatus), "Active");
        let view = form.pending_view().unwrap();
        assert_eq!(view.severity, Severity::Critical);
        assert_eq!((view.current, view.next), ("Active", "Deceased"));

        form.confirm_dialog(Some("Passed away".to_string()));
        assert_eq!(form.status.value(), MembershipStatus::Deceased);
        assert!(form.dialog.is_none());
        assert_eq!(form.payload().status_change_reason.as_deref(), Some("Passed away"));
    }

    #[test]
    fn test_cancel_keeps_original_status() {
        let (db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        form.request_status(MembershipStatus::Deceased);
        form.cancel_dialog();
        assert_eq!(form.status.value(), MembershipStatus::Active);
        assert!(form.status.pending().is_none());
        assert_eq!(form.payload().membership_status, MembershipStatus::Active);
    }

    #[test]
    fn test_guarded_fields_are_independent() {
        let (db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        form.request_function(MinisterialFunction::Pastor);
        form.confirm_dialog(None);
        form.request_status(MembershipStatus::Transferred);
        form.cancel_dialog();
        assert_eq!(form.function.value(), MinisterialFunction::Pastor);
        assert_eq!(form.status.value(), MembershipStatus::Active);
    }

    #[test]
    fn test_second_guarded_request_keeps_first_reachable() {
        let (db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        form.request_status(MembershipStatus::Transferred);
        form.request_function(MinisterialFunction::Elder);
        assert_eq!(form.dialog, Some(GuardKind::Function));

        form.confirm_dialog(None);
        assert_eq!(form.function.value(), MinisterialFunction::Elder);
        assert_eq!(form.dialog, Some(GuardKind::Status));
        let view = form.pending_view().unwrap();
        assert_eq!((view.current, view.next), ("Active", "Transferred"));

        form.cancel_dialog();
        assert!(form.dialog.is_none());
        assert!(form.status.pending().is_none());
        assert_eq!(form.status.value(), MembershipStatus::Active);
    }

    #[test]
    fn test_selecting_committed_value_opens_nothing() {
        let (db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        form.open_chooser(GuardKind::Function);
        assert_eq!(form.chooser_pick(), Some(ChangeOutcome::Unchanged));
        assert!(form.dialog.is_none());
        assert!(form.function.pending().is_none());
    }

    #[test]
    fn test_creation_applies_guarded_changes_immediately() {
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        form.focus(MemberField::MembershipStatus);
        form.handle_left_right(true);
        assert_eq!(form.chooser_pick(), Some(ChangeOutcome::Applied));
        assert_eq!(form.status.value(), MembershipStatus::Inactive);
        assert!(form.dialog.is_none());
    }

    #[test]
    fn test_masks_apply_while_typing() {
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        type_into(&mut form, MemberField::Phone, "11999998888");
        assert_eq!(form.phone.value, "(11) 99999-8888");
        type_into(&mut form, MemberField::ZipCode, "01310100");
        assert_eq!(form.zip_code.value, "01310-100");
    }

    #[test]
    fn test_access_payload_shapes() {
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        type_into(&mut form, MemberField::FullName, "Ana Souza");
        assert!(form.validate_all());
        let access = form.payload().access.unwrap();
        assert!(!access.create_system_user);
        assert_eq!(access.system_role, None);
        assert_eq!(access.user_email, None);

        form.focus(MemberField::CreateSystemUser);
        form.handle_char(' ');
        assert!(!form.validate_all());
        assert!(form.errors.get("system_role").is_some());
        assert!(form.errors.get("user_email").is_some());

        form.system_role = form.role_options.iter().position(|r| *r == SystemRole::Secretary);
        type_into(&mut form, MemberField::UserEmail, "a@b.com");
        assert!(form.validate_all());
        assert_eq!(
            form.payload().access,
            Some(SystemAccess {
                create_system_user: true,
                system_role: Some(SystemRole::Secretary),
                user_email: Some("a@b.com".to_string()),
            })
        );
    }

    #[test]
    fn test_role_options_follow_actor() {
        let actor = Actor { role: SystemRole::Secretary, ..Actor::default() };
        let form = MemberForm::new(1, &actor, &[]);
        assert_eq!(form.role_options, vec![SystemRole::Leader, SystemRole::ReadOnly]);
    }

    #[test]
    fn test_self_edit_hides_access() {
        let (mut db, member) = setup();
        let mut update = member_payload(member.church_id, "Maria da Silva");
        update.email = Some("maria@x.org".to_string());
        update.access = Some(SystemAccess {
            create_system_user: true,
            system_role: Some(SystemRole::ChurchAdmin),
            user_email: Some("maria.admin@x.org".to_string()),
        });
        let member = db.update_member(member.id, update, "admin").unwrap();

        let actor = Actor { email: "MARIA@x.org".to_string(), role: SystemRole::ChurchAdmin, ..Actor::default() };
        let mut form = MemberForm::edit(&member, &actor, &[], &db);
        assert!(form.self_edit);
        assert!(form.visible_fields(MemberTab::Access).is_empty());
        form.focus(MemberField::FullName);
        form.switch_tab(false);
        assert_eq!(form.tab, MemberTab::Access);
        assert_eq!(form.current_field(), None);
        form.handle_char(' ');
        assert!(form.validate_all());
        assert_eq!(form.payload().access, None);
    }

    fn setup_with_login(role: SystemRole) -> (Database, Member) {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut payload = member_payload(church.id, "Maria da Silva");
        payload.access = Some(SystemAccess {
            create_system_user: true,
            system_role: Some(role),
            user_email: Some("maria@x.org".to_string()),
        });
        let member = db.create_member(payload, "admin").unwrap();
        (db, member)
    }

    #[test]
    fn test_lower_actor_edits_member_with_higher_access() {
        let (mut db, member) = setup_with_login(SystemRole::ChurchAdmin);
        let secretary = Actor { email: "sec@x.org".to_string(), role: SystemRole::Secretary, ..Actor::default() };
        let mut form = MemberForm::edit(&member, &secretary, &[], &db);
        assert_eq!(form.access_notice(), Some(ACCESS_LOCKED_NOTICE));
        assert!(!form.access_enabled());
        assert!(form.visible_fields(MemberTab::Access).is_empty());

        type_into(&mut form, MemberField::Phone, "81999990000");
        assert_eq!(form.payload().access, None);
        let saved = form.submit(&mut db, &secretary.label()).unwrap();
        assert_eq!(saved.phone.as_deref(), Some("(81) 99999-0000"));
        assert_eq!(saved.system_role, Some(SystemRole::ChurchAdmin));
        assert_eq!(saved.user_email.as_deref(), Some("maria@x.org"));
        assert_eq!(saved.user_id, member.user_id);
    }

    #[test]
    fn test_unchecking_access_revokes_login() {
        let (mut db, member) = setup_with_login(SystemRole::Secretary);
        assert!(member.user_id.is_some());
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        assert!(form.create_system_user);
        assert_eq!(form.access_notice(), None);

        form.focus(MemberField::CreateSystemUser);
        form.handle_char(' ');
        assert!(!form.create_system_user);
        let saved = form.submit(&mut db, "admin").unwrap();
        assert_eq!((saved.user_id, saved.system_role, saved.user_email), (None, None, None));
        assert_eq!(db.get_member(member.id).unwrap().user_id, None);
    }

    #[test]
    fn test_children_links_reject_self_and_duplicates() {
        let (mut db, member) = setup();
        let child = db.create_member(member_payload(member.church_id, "Lucas da Silva"), "admin").unwrap();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);

        let own = ChildLink { id: member.id, full_name: member.full_name.clone(), age: None };
        assert_eq!(form.add_child(own), Err(ChildLinkError::SelfLink));

        type_into(&mut form, MemberField::Children, "lucas");
        form.refresh_child_candidates(&db);
        assert_eq!(form.child_picker.candidates.len(), 1);
        assert_eq!(form.add_highlighted_child(), Ok(Some("Lucas da Silva".to_string())));
        let again = ChildLink { id: child.id, full_name: child.full_name.clone(), age: None };
        assert!(matches!(form.add_child(again), Err(ChildLinkError::Duplicate(_))));

        let payload = form.payload();
        assert_eq!(payload.children_ids, vec![child.id]);
        assert_eq!(payload.children_count, Some(1));

        form.children_count.set("3");
        assert_eq!(form.payload().children_count, Some(3));

        assert_eq!(form.unlink_last_child(), Some("Lucas da Silva".to_string()));
        assert!(form.payload().children_ids.is_empty());
        assert_eq!(form.unlink_last_child(), None);
    }

    #[test]
    fn test_spouse_resolution() {
        let (mut db, member) = setup();
        let spouse = db.create_member(member_payload(member.church_id, "José da Silva"), "admin").unwrap();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);

        assert!(!form.visible_fields(MemberTab::Personal).contains(&MemberField::Spouse));
        form.focus(MemberField::MaritalStatus);
        form.handle_left_right(true);
        assert_eq!(form.marital(), MaritalStatus::Married);
        assert!(form.visible_fields(MemberTab::Personal).contains(&MemberField::Spouse));
        assert_eq!(form.payload().spouse_id, None);

        type_into(&mut form, MemberField::Spouse, "josé");
        form.refresh_spouse_candidates(&db);
        form.handle_left_right(true);
        assert_eq!(form.payload().spouse_id, Some(spouse.id));

        form.focus(MemberField::MaritalStatus);
        form.handle_left_right(true);
        assert_eq!(form.payload().spouse_id, None);
    }

    #[test]
    fn test_payload_normalisation() {
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        type_into(&mut form, MemberField::FullName, "  Ana Souza ");
        form.cpf.set("123.45678900");
        form.state.set("sp");
        form.zip_code.set("0131");
        let payload = form.payload();
        assert_eq!(payload.full_name, "Ana Souza");
        assert_eq!(payload.cpf.as_deref(), Some("123.456.789-00"));
        assert_eq!(payload.address.state, "SP");
        assert_eq!(payload.address.zip_code, "0131");
        assert_eq!(payload.phone, None);
    }

    #[test]
    fn test_autofill_is_best_effort() {
        let mut postal = PostalDirectory::default();
        postal.insert(
            "01310-100",
            Address { street: "Avenida Paulista".to_string(), city: "São Paulo".to_string(), state: "SP".to_string(), ..Address::default() },
        );
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        form.zip_code.set("01310-100");
        assert!(form.autofill_address(&postal));
        assert_eq!(form.street.value, "Avenida Paulista");

        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        form.zip_code.set("99999-999");
        form.street.set("Rua A");
        assert!(!form.autofill_address(&postal));
        assert_eq!(form.street.value, "Rua A");
    }

    #[test]
    fn test_blur_flags_duplicate_email() {
        let (db, member) = setup();
        let mut form = MemberForm::new(member.church_id, &Actor::default(), &[]);
        type_into(&mut form, MemberField::Email, "MARIA@x.org");
        form.on_blur(MemberField::Email, &db, &PostalDirectory::default());
        assert_eq!(form.errors.get("email"), Some("This email is already registered"));

        let mut own = MemberForm::edit(&member, &Actor::default(), &[], &db);
        own.on_blur(MemberField::Email, &db, &PostalDirectory::default());
        assert!(own.errors.get("email").is_none());
    }

    struct FailingMembers;

    impl MemberService for FailingMembers {
        fn list_members(&self, _: &MemberQuery) -> ServiceResult<Page<Member>> {
            Ok(Page::empty())
        }
        fn get_member(&self, id: u64) -> ServiceResult<Member> {
            Err(ServiceError::NotFound { entity: "member", id })
        }
        fn create_member(&mut self, payload: MemberPayload, _: &str) -> ServiceResult<Member> {
            Err(ServiceError::Conflict { field: "email", value: payload.email.unwrap_or_default() })
        }
        fn update_member(&mut self, id: u64, _: MemberPayload, _: &str) -> ServiceResult<Member> {
            Err(ServiceError::NotFound { entity: "member", id })
        }
        fn delete_member(&mut self, _: u64) -> ServiceResult<()> {
            Ok(())
        }
        fn search_members(&self, _: u64, _: &str, _: Option<u64>) -> ServiceResult<Vec<Member>> {
            Err(ServiceError::Lookup("offline".to_string()))
        }
        fn email_in_use(&self, _: &str, _: Option<u64>) -> ServiceResult<bool> {
            Err(ServiceError::Lookup("offline".to_string()))
        }
    }

    #[test]
    fn test_failed_submit_keeps_values() {
        let mut form = MemberForm::new(1, &Actor::default(), &[]);
        type_into(&mut form, MemberField::FullName, "Ana Souza");
        type_into(&mut form, MemberField::Email, "ana@x.org");
        form.on_blur(MemberField::Email, &FailingMembers, &PostalDirectory::default());
        assert!(form.errors.is_empty());

        let err = form.submit(&mut FailingMembers, "admin").unwrap_err();
        assert!(matches!(err, SubmitError::Service(ServiceError::Conflict { .. })));
        assert_eq!(err.toast(), "This email is already registered");
        assert_eq!(form.full_name.value, "Ana Souza");
        assert_eq!(form.email.value, "ana@x.org");
        assert!(form.errors.get("email").is_some());
        assert!(!form.submitting);
    }

    #[test]
    fn test_submit_blocked_while_in_flight_or_invalid() {
        let (mut db, member) = setup();
        let mut form = MemberForm::new(member.church_id, &Actor::default(), &[]);
        let err = form.submit(&mut db, "admin").unwrap_err();
        assert!(matches!(err, SubmitError::Invalid { count: 1, .. }));
        assert_eq!(form.current_field(), Some(MemberField::FullName));

        type_into(&mut form, MemberField::FullName, "Pedro Alves");
        form.submitting = true;
        assert!(matches!(form.submit(&mut db, "admin"), Err(SubmitError::InFlight)));
        form.submitting = false;
        let created = form.submit(&mut db, "admin").unwrap();
        assert_eq!(created.full_name, "Pedro Alves");
    }

    #[test]
    fn test_edit_submit_records_history() {
        let (mut db, member) = setup();
        let mut form = MemberForm::edit(&member, &Actor::default(), &[], &db);
        form.request_status(MembershipStatus::Transferred);
        form.confirm_dialog(Some("Moved".to_string()));
        form.submit(&mut db, "admin").unwrap();
        let log: MembershipStatusLog = crate::service::HistoryService::status_log(&db, member.id).unwrap();
        assert_eq!(log.current_status, MembershipStatus::Transferred);
        assert_eq!(log.history.last().unwrap().reason.as_deref(), Some("Moved"));
    }
}
