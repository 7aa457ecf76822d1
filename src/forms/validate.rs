//! Field rules, cross-field rules and input masks shared by the entity forms.
//!
//! Base rules are checked per field when the cursor leaves it and again for every
//! field on submit. Cross-field rules are a separate tagged set evaluated after the
//! base rules, so "what requires what" stays readable in one place per form.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(\d{2}\) \d{4,5}-\d{4}$").unwrap());
static ZIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}-\d{3}$").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static CPF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}\.\d{3}\.\d{3}-\d{2}$").unwrap());
static CNPJ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}$").unwrap());
static STATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2}$").unwrap());

/// A declarative constraint on a single text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Required,
    MinLen(usize),
    MaxLen(usize),
    /// `(DD) DDDD-DDDD` or `(DD) DDDDD-DDDD`
    Phone,
    /// `DDDDD-DDD`
    ZipCode,
    Email,
    /// `DDD.DDD.DDD-DD`
    Cpf,
    /// `DD.DDD.DDD/DDDD-DD`
    Cnpj,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DD HH:MM`
    DateTime,
    StateCode,
    Number,
}

impl FieldRule {
    /// Check a value, returning the message for the first violated constraint.
    ///
    /// Every rule except `Required` accepts an empty value.
    pub fn check(self, value: &str) -> Option<String> {
        let v = value.trim();
        if v.is_empty() {
            return match self {
                FieldRule::Required => Some("This field is required".to_string()),
                _ => None,
            };
        }
        let ok = match self {
            FieldRule::Required => true,
            FieldRule::MinLen(n) => v.chars().count() >= n,
            FieldRule::MaxLen(n) => v.chars().count() <= n,
            FieldRule::Phone => PHONE_RE.is_match(v),
            FieldRule::ZipCode => ZIP_RE.is_match(v),
            FieldRule::Email => EMAIL_RE.is_match(v),
            FieldRule::Cpf => CPF_RE.is_match(v),
            FieldRule::Cnpj => CNPJ_RE.is_match(v),
            FieldRule::Date => parse_date(v).is_some(),
            FieldRule::DateTime => parse_datetime(v).is_some(),
            FieldRule::StateCode => STATE_RE.is_match(v),
            FieldRule::Number => v.parse::<u32>().is_ok(),
        };
        if ok {
            return None;
        }
        Some(match self {
            FieldRule::Required => unreachable!(),
            FieldRule::MinLen(n) => format!("Must be at least {} characters", n),
            FieldRule::MaxLen(n) => format!("Must be at most {} characters", n),
            FieldRule::Phone => "Phone must look like (11) 99999-8888".to_string(),
            FieldRule::ZipCode => "CEP must look like 01310-100".to_string(),
            FieldRule::Email => "Invalid email address".to_string(),
            FieldRule::Cpf => "CPF must look like 123.456.789-00".to_string(),
            FieldRule::Cnpj => "CNPJ must look like 12.345.678/0001-90".to_string(),
            FieldRule::Date => "Date must be YYYY-MM-DD".to_string(),
            FieldRule::DateTime => "Use YYYY-MM-DD HH:MM".to_string(),
            FieldRule::StateCode => "Use the two-letter state code".to_string(),
            FieldRule::Number => "Must be a whole number".to_string(),
        })
    }
}

/// Run all rules for a field, returning the first failure.
pub fn check_rules(value: &str, rules: &[FieldRule]) -> Option<String> {
    rules.iter().find_map(|r| r.check(value))
}

/// Read access to a form's raw values, used by cross-field rules.
pub trait FormValues {
    fn text(&self, field: &str) -> String;
    fn flag(&self, field: &str) -> bool;
}

/// Conditional and relational constraints spanning several fields.
#[derive(Debug, Clone, Copy)]
pub enum CrossRule {
    /// While `flag` is on, each listed field must satisfy its rules.
    /// While it is off the fields are not validated at all.
    RequiredWhen {
        flag: &'static str,
        fields: &'static [(&'static str, &'static [FieldRule])],
    },
    /// `later` must not be before `earlier`; skipped when either is unparseable.
    NotBefore {
        earlier: &'static str,
        later: &'static str,
        message: &'static str,
    },
}

impl CrossRule {
    pub fn evaluate(&self, form: &dyn FormValues, errors: &mut FieldErrors) {
        match *self {
            CrossRule::RequiredWhen { flag, fields } => {
                if !form.flag(flag) {
                    return;
                }
                for (field, rules) in fields {
                    if let Some(msg) = check_rules(&form.text(field), rules) {
                        errors.insert(*field, msg);
                    }
                }
            }
            CrossRule::NotBefore { earlier, later, message } => {
                let (a, b) = (parse_when(&form.text(earlier)), parse_when(&form.text(later)));
                if let (Some(a), Some(b)) = (a, b) {
                    if b < a {
                        errors.insert(later, message.to_string());
                    }
                }
            }
        }
    }

    /// Fields whose errors this rule owns.
    pub fn fields(&self) -> Vec<&'static str> {
        match *self {
            CrossRule::RequiredWhen { fields, .. } => fields.iter().map(|(f, _)| *f).collect(),
            CrossRule::NotBefore { later, .. } => vec![later],
        }
    }
}

/// Per-field error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn insert(&mut self, field: &'static str, message: String) {
        self.0.insert(field, message);
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn remove(&mut self, field: &str) {
        self.0.remove(field);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// First error in the order the form lays out its fields. Keys missing
    /// from `order` come after every listed one.
    pub fn first<I>(&self, order: I) -> Option<(&'static str, &str)>
    where
        I: IntoIterator<Item = &'static str>,
    {
        order
            .into_iter()
            .find_map(|key| self.0.get_key_value(key).map(|(k, v)| (*k, v.as_str())))
            .or_else(|| self.iter().next())
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M").ok()
}

/// Parse either a date-time or a bare date (midnight).
pub fn parse_when(s: &str) -> Option<NaiveDateTime> {
    parse_datetime(s).or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn digits(s: &str, max: usize) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).take(max).collect()
}

/// Progressive phone mask: `(DD) DDDD-DDDD`, or `(DD) DDDDD-DDDD` with 11 digits.
pub fn mask_phone(input: &str) -> String {
    let d = digits(input, 11);
    match d.len() {
        0 => String::new(),
        1..=2 => format!("({}", d),
        3..=6 => format!("({}) {}", &d[..2], &d[2..]),
        7..=10 => format!("({}) {}-{}", &d[..2], &d[2..6], &d[6..]),
        _ => format!("({}) {}-{}", &d[..2], &d[2..7], &d[7..]),
    }
}

/// Progressive CEP mask: `DDDDD-DDD`.
pub fn mask_zip(input: &str) -> String {
    let d = digits(input, 8);
    if d.len() > 5 {
        format!("{}-{}", &d[..5], &d[5..])
    } else {
        d
    }
}

/// Progressive CPF mask: `DDD.DDD.DDD-DD`.
pub fn mask_cpf(input: &str) -> String {
    let d = digits(input, 11);
    let mut out = String::new();
    for (i, c) in d.chars().enumerate() {
        match i {
            3 | 6 => out.push('.'),
            9 => out.push('-'),
            _ => {}
        }
        out.push(c);
    }
    out
}

/// Progressive CNPJ mask: `DD.DDD.DDD/DDDD-DD`.
pub fn mask_cnpj(input: &str) -> String {
    let d = digits(input, 14);
    let mut out = String::new();
    for (i, c) in d.chars().enumerate() {
        match i {
            2 | 5 => out.push('.'),
            8 => out.push('/'),
            12 => out.push('-'),
            _ => {}
        }
        out.push(c);
    }
    out
}

/// CEP for submission: masked only when exactly eight digits were entered.
pub fn normalize_zip(input: &str) -> String {
    let d: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    if d.len() == 8 {
        mask_zip(&d)
    } else {
        input.trim().to_string()
    }
}

/// Trimmed text, `None` when empty.
pub fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(mask_phone("11999998888"), "(11) 99999-8888");
        assert_eq!(mask_phone("1133334444"), "(11) 3333-4444");
        assert_eq!(mask_phone("119"), "(11) 9");
        assert_eq!(mask_zip("01310100"), "01310-100");
        assert_eq!(mask_zip("0131"), "0131");
        assert_eq!(mask_cpf("12345678900"), "123.456.789-00");
        assert_eq!(mask_cnpj("12345678000190"), "12.345.678/0001-90");
    }

    #[test]
    fn test_masked_values_pass_their_rules() {
        assert_eq!(FieldRule::Phone.check(&mask_phone("11999998888")), None);
        assert_eq!(FieldRule::ZipCode.check(&mask_zip("01310100")), None);
        assert_eq!(FieldRule::Cpf.check(&mask_cpf("12345678900")), None);
        assert_eq!(FieldRule::Cnpj.check(&mask_cnpj("12345678000190")), None);
        assert!(FieldRule::Phone.check("(11) 9999").is_some());
    }

    #[test]
    fn test_empty_values_only_fail_required() {
        assert!(FieldRule::Required.check("  ").is_some());
        assert!(FieldRule::Email.check("").is_none());
        assert!(check_rules("x", &[FieldRule::Required, FieldRule::MinLen(3)]).is_some());
    }

    #[test]
    fn test_normalize_zip_only_masks_eight_digits() {
        assert_eq!(normalize_zip("01310100"), "01310-100");
        assert_eq!(normalize_zip(" 0131 "), "0131");
    }

    struct Values {
        on: bool,
        role: &'static str,
        email: &'static str,
    }

    impl FormValues for Values {
        fn text(&self, field: &str) -> String {
            match field {
                "system_role" => self.role.to_string(),
                "user_email" => self.email.to_string(),
                "start" => "2025-03-01 19:00".to_string(),
                "end" => "2025-03-01".to_string(),
                _ => String::new(),
            }
        }
        fn flag(&self, _field: &str) -> bool {
            self.on
        }
    }

    const ACCESS: CrossRule = CrossRule::RequiredWhen {
        flag: "create_system_user",
        fields: &[
            ("system_role", &[FieldRule::Required]),
            ("user_email", &[FieldRule::Required, FieldRule::Email]),
        ],
    };

    #[test]
    fn test_required_when_only_applies_with_flag() {
        let mut errors = FieldErrors::default();
        ACCESS.evaluate(&Values { on: false, role: "", email: "" }, &mut errors);
        assert!(errors.is_empty());

        ACCESS.evaluate(&Values { on: true, role: "", email: "nope" }, &mut errors);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("user_email"), Some("Invalid email address"));
    }

    #[test]
    fn test_not_before() {
        let rule = CrossRule::NotBefore { earlier: "start", later: "end", message: "End before start" };
        let mut errors = FieldErrors::default();
        rule.evaluate(&Values { on: true, role: "", email: "" }, &mut errors);
        assert_eq!(errors.get("end"), Some("End before start"));
    }

    #[test]
    fn test_first_error_follows_field_order() {
        let mut errors = FieldErrors::default();
        errors.insert("city", "City is required".to_string());
        errors.insert("name", "Name is required".to_string());
        errors.insert("zzz", "Unlisted".to_string());

        assert_eq!(errors.first(["name", "email", "city"]), Some(("name", "Name is required")));
        assert_eq!(errors.first(["email"]), Some(("city", "City is required")));
        assert_eq!(FieldErrors::default().first(["name"]), None);
    }
}
