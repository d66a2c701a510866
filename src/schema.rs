use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct PropertyId(pub u64);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Property {
    pub id: PropertyId,
    #[schemars(description = "Display name of the rental property")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    pub id: u64,
    pub property_id: PropertyId,
    #[schemars(description = "Booking date of the bank transaction")]
    pub date: NaiveDate,
    #[schemars(
        description = "Signed amount as it appears on the bank statement: inflows positive, outflows negative"
    )]
    pub amount: f64,
    #[serde(default)]
    pub label: String,
    #[schemars(description = "Top-level classification tag assigned by the mapping table")]
    pub level_1: String,
    #[serde(default)]
    pub level_2: Option<String>,
    #[serde(default)]
    pub level_3: Option<String>,
}

impl Transaction {
    pub fn year(&self) -> i32 {
        self.date.year()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTiming {
    #[default]
    #[schemars(description = "Payments are due at the end of each period (standard bank loan)")]
    End,
    #[schemars(description = "Payments are due at the beginning of each period (annuity due)")]
    Begin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanConfig {
    pub id: u64,
    pub property_id: PropertyId,
    #[serde(default)]
    pub name: String,
    #[schemars(description = "Borrowed principal, strictly positive")]
    pub credit_amount: f64,
    #[schemars(description = "Annual nominal interest rate in percent (2.5 means 2.5 %)")]
    pub interest_rate: f64,
    #[schemars(description = "Amortization duration in years, deferral excluded")]
    pub duration_years: u32,
    #[serde(default)]
    #[schemars(
        description = "Grace period in months at the start of the loan during which only interest is paid"
    )]
    pub initial_deferral_months: u32,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    #[schemars(description = "Flat monthly insurance premium added on top of each payment")]
    pub monthly_insurance: f64,
    #[serde(default)]
    #[schemars(
        description = "Schedule months (1-based, deferral included) whose interest is reported individually"
    )]
    pub interest_sample_months: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanPayment {
    pub id: u64,
    pub property_id: PropertyId,
    pub loan_config_id: u64,
    pub date: NaiveDate,
    pub capital: f64,
    pub interest: f64,
    #[serde(default)]
    pub insurance: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmortizationType {
    pub id: u64,
    pub property_id: PropertyId,
    #[schemars(description = "Fixed-asset category, e.g. 'Immobilisations' or 'Mobilier'")]
    pub name: String,
    #[schemars(
        description = "Level-1 values whose transaction amounts fund (make up the cost of) this asset"
    )]
    pub level_1_values: Vec<String>,
    #[schemars(description = "Straight-line depreciation duration in years")]
    pub duration_years: u32,
    #[serde(default)]
    #[schemars(description = "Explicit yearly amount; when set the cost is not derived from transactions")]
    pub annual_amount: Option<f64>,
    #[serde(default)]
    #[schemars(
        description = "Depreciation start. Defaults to the date of the earliest funding transaction"
    )]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmortizationResult {
    pub property_id: PropertyId,
    pub amortization_type_id: u64,
    pub year: i32,
    pub amount: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum CompteResultatType {
    #[serde(rename = "Produits d'exploitation")]
    Produits,
    #[serde(rename = "Charges d'exploitation")]
    Charges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    #[schemars(description = "Depreciation of the year, summed over every amortization type")]
    DepreciationCharges,
    #[schemars(description = "Loan interest plus insurance paid during the year")]
    FinancingCost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompteResultatMapping {
    pub id: u64,
    pub property_id: PropertyId,
    pub category_name: String,
    #[serde(rename = "type")]
    pub category_type: CompteResultatType,
    #[serde(default)]
    pub level_1_values: Vec<String>,
    #[serde(default)]
    #[schemars(description = "When set, the amount is computed from this source instead of transactions")]
    pub special_source: Option<ResultSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompteResultatData {
    pub property_id: PropertyId,
    pub year: i32,
    pub category_name: String,
    #[serde(rename = "type")]
    pub category_type: CompteResultatType,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompteResultatOverride {
    pub property_id: PropertyId,
    pub year: i32,
    #[schemars(description = "Pinned 'Résultat de l'exercice' for the year")]
    pub resultat_exercice: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum BilanType {
    #[serde(rename = "ACTIF")]
    Actif,
    #[serde(rename = "PASSIF")]
    Passif,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BilanSource {
    #[schemars(
        description = "Amortissements cumulés: depreciation of every year up to and including the year, reported negatively"
    )]
    AccumulatedDepreciation,
    #[schemars(description = "Bank balance: every transaction booked up to the end of the year")]
    CashBalance,
    #[schemars(description = "Résultat de l'exercice taken from the compte de résultat (override included)")]
    YearResult,
    #[schemars(description = "Report à nouveau: results of all previous years")]
    RetainedEarnings,
    #[schemars(description = "Borrowed capital not yet repaid at the end of the year")]
    OutstandingLoanCapital,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BilanMapping {
    pub id: u64,
    pub property_id: PropertyId,
    pub category_name: String,
    #[serde(rename = "type")]
    pub bilan_type: BilanType,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub level_1_values: Vec<String>,
    #[serde(default)]
    pub special_source: Option<BilanSource>,
}

impl BilanMapping {
    pub fn is_special(&self) -> bool {
        self.special_source.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BilanData {
    pub property_id: PropertyId,
    pub year: i32,
    pub category_name: String,
    #[serde(rename = "type")]
    pub bilan_type: BilanType,
    pub sub_category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BilanConfig {
    pub property_id: PropertyId,
    #[serde(default)]
    #[schemars(
        description = "Allowed level-3 values. Empty means every transaction is eligible for the bilan"
    )]
    pub level_3_values: Vec<String>,
}

impl BilanConfig {
    pub fn allows(&self, level_3: Option<&str>) -> bool {
        if self.level_3_values.is_empty() {
            return true;
        }
        match level_3 {
            Some(value) => self.level_3_values.iter().any(|v| v == value),
            None => false,
        }
    }
}

pub fn generate_json_schema<T: JsonSchema>() -> schemars::schema::RootSchema {
    schemars::schema_for!(T)
}

pub fn schema_as_json<T: JsonSchema>() -> Result<String, serde_json::Error> {
    let schema = generate_json_schema::<T>();
    serde_json::to_string_pretty(&schema)
}
