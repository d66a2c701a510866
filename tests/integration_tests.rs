use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use rental_ledger::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn export_schedule_to_csv(schedule: &AmortizationSchedule, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "period", "date", "year", "balance_start", "interest", "principal", "insurance", "total",
        "balance_end",
    ])?;
    for period in &schedule.periods {
        writer.write_record([
            period.period.to_string(),
            period
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            period.year.to_string(),
            format!("{:.2}", period.balance_start),
            format!("{:.2}", period.interest),
            format!("{:.2}", period.principal),
            format!("{:.2}", period.insurance),
            format!("{:.2}", period.total),
            format!("{:.2}", period.balance_end),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rental_ledger_{}_{}.csv", name, std::process::id()))
}

fn transaction(property_id: PropertyId, date: NaiveDate, amount: f64, level_1: &str) -> Transaction {
    Transaction {
        id: 0,
        property_id,
        date,
        amount,
        label: level_1.to_lowercase(),
        level_1: level_1.to_string(),
        level_2: None,
        level_3: None,
    }
}

fn cr_mapping(
    property_id: PropertyId,
    name: &str,
    category_type: CompteResultatType,
    level_1: &[&str],
    special_source: Option<ResultSource>,
) -> CompteResultatMapping {
    CompteResultatMapping {
        id: 0,
        property_id,
        category_name: name.to_string(),
        category_type,
        level_1_values: level_1.iter().map(|s| s.to_string()).collect(),
        special_source,
    }
}

fn bilan_mapping(
    property_id: PropertyId,
    name: &str,
    bilan_type: BilanType,
    sub_category: &str,
    level_1: &[&str],
    special_source: Option<BilanSource>,
) -> BilanMapping {
    BilanMapping {
        id: 0,
        property_id,
        category_name: name.to_string(),
        bilan_type,
        sub_category: sub_category.to_string(),
        level_1_values: level_1.iter().map(|s| s.to_string()).collect(),
        special_source,
    }
}

/// A flat bought in March 2022 with a 100 000 loan, rented out 2022-2024.
/// Every cash flow is mapped, so its bilans balance.
fn seed_property<S: LedgerStore>(
    ledger: &PropertyLedger<S>,
    name: &str,
    yearly_rent: f64,
) -> Result<PropertyId> {
    let property = ledger.create_property(name)?.id;

    ledger.upsert_transaction(transaction(property, date(2022, 3, 1), 100_000.0, "EMPRUNT"))?;
    ledger.upsert_transaction(transaction(
        property,
        date(2022, 3, 15),
        -100_000.0,
        "IMMOBILISATIONS",
    ))?;
    for year in 2022..=2024 {
        ledger.upsert_transaction(transaction(property, date(year, 6, 30), yearly_rent, "LOYERS"))?;
        ledger.upsert_transaction(transaction(
            property,
            date(year, 10, 15),
            -700.0,
            "TAXE FONCIERE",
        ))?;
    }

    let loan = ledger.upsert_loan_config(LoanConfig {
        id: 0,
        property_id: property,
        name: "Crédit immobilier".to_string(),
        credit_amount: 100_000.0,
        interest_rate: 2.0,
        duration_years: 20,
        initial_deferral_months: 0,
        start_date: Some(date(2022, 3, 1)),
        end_date: None,
        monthly_insurance: 15.0,
        interest_sample_months: vec![1, 12],
    })?;
    for payment in ledger.save_simulated_payments(property, loan.id)? {
        if payment.date.year() <= 2024 {
            ledger.upsert_transaction(transaction(property, payment.date, -payment.total, "PRET"))?;
        }
    }

    ledger.upsert_amortization_type(AmortizationType {
        id: 0,
        property_id: property,
        name: "Immobilisations".to_string(),
        level_1_values: vec!["IMMOBILISATIONS".to_string()],
        duration_years: 25,
        annual_amount: None,
        start_date: None,
    })?;

    for mapping in [
        cr_mapping(property, "Loyers", CompteResultatType::Produits, &["LOYERS"], None),
        cr_mapping(
            property,
            "Impôts et taxes",
            CompteResultatType::Charges,
            &["TAXE FONCIERE"],
            None,
        ),
        cr_mapping(
            property,
            "Dotations aux amortissements",
            CompteResultatType::Charges,
            &[],
            Some(ResultSource::DepreciationCharges),
        ),
        cr_mapping(
            property,
            "Coût du financement",
            CompteResultatType::Charges,
            &[],
            Some(ResultSource::FinancingCost),
        ),
    ] {
        ledger.upsert_compte_resultat_mapping(mapping)?;
    }

    for mapping in [
        bilan_mapping(
            property,
            "Immobilisations",
            BilanType::Actif,
            "Actif immobilisé",
            &["IMMOBILISATIONS"],
            None,
        ),
        bilan_mapping(
            property,
            "Amortissements cumulés",
            BilanType::Actif,
            "Actif immobilisé",
            &[],
            Some(BilanSource::AccumulatedDepreciation),
        ),
        bilan_mapping(
            property,
            "Trésorerie",
            BilanType::Actif,
            "Actif circulant",
            &[],
            Some(BilanSource::CashBalance),
        ),
        bilan_mapping(
            property,
            "Résultat de l'exercice",
            BilanType::Passif,
            "Capitaux propres",
            &[],
            Some(BilanSource::YearResult),
        ),
        bilan_mapping(
            property,
            "Report à nouveau",
            BilanType::Passif,
            "Capitaux propres",
            &[],
            Some(BilanSource::RetainedEarnings),
        ),
        bilan_mapping(
            property,
            "Emprunts",
            BilanType::Passif,
            "Dettes",
            &[],
            Some(BilanSource::OutstandingLoanCapital),
        ),
    ] {
        ledger.upsert_bilan_mapping(mapping)?;
    }

    Ok(property)
}

#[test]
fn test_reference_loan_schedule_export() -> Result<()> {
    init_logging();

    let loan = LoanConfig {
        id: 1,
        property_id: PropertyId(1),
        name: "Référence".to_string(),
        credit_amount: 200_000.0,
        interest_rate: 2.5,
        duration_years: 20,
        initial_deferral_months: 0,
        start_date: Some(date(2024, 1, 1)),
        end_date: None,
        monthly_insurance: 0.0,
        interest_sample_months: vec![1, 240],
    };
    let schedule = compute_amortization_schedule(&loan, &EngineConfig::default())?;

    assert_eq!(schedule.periods.len(), 240);
    assert!((schedule.payment + 1059.81).abs() < 0.01, "payment {}", schedule.payment);
    let first = &schedule.periods[0];
    assert!((first.interest - 416.67).abs() < 0.01, "interest {}", first.interest);
    assert!((first.principal - 643.14).abs() < 0.01, "principal {}", first.principal);
    assert!(schedule.periods[239].balance_end.abs() < 1e-6);
    assert!((schedule.total_capital() - 200_000.0).abs() < 1e-6);
    assert!(schedule.warnings.is_empty(), "{:?}", schedule.warnings);
    assert_eq!(schedule.sampled_interest.len(), 2);

    let path = csv_path("reference_schedule");
    export_schedule_to_csv(&schedule, &path)?;
    let mut reader = csv::Reader::from_path(&path)?;
    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 240);
    assert_eq!(&rows[0][4], "416.67");
    std::fs::remove_file(&path)?;

    Ok(())
}

#[test]
fn test_statements_balance() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let property = seed_property(&ledger, "T3 Nantes", 9_600.0)?;

    let summary = ledger.recompute_depreciation(property)?;
    assert_eq!(summary.types_processed, 1);
    assert_eq!(summary.rows_written, 25);

    let statements = ledger.calculate_compte_resultat(property, &[2022, 2023, 2024])?;
    let year = &statements[&2023];
    assert_eq!(year.produits["Loyers"], 9_600.0);
    assert_eq!(year.charges["Impôts et taxes"], 700.0);
    assert_eq!(year.charges["Dotations aux amortissements"], 4_000.0);
    let financing = year.charges["Coût du financement"];
    assert!(financing > 12.0 * 15.0 && financing < 2_000.0 + 12.0 * 15.0, "financing {}", financing);

    let bilans = ledger.calculate_bilan(property, &[2022, 2023, 2024])?;
    for (year, bilan) in &bilans {
        assert!(
            bilan.is_balanced(1e-6),
            "bilan {} off by {} (actif {}, passif {})",
            year,
            bilan.difference,
            bilan.actif_total,
            bilan.passif_total
        );
    }
    assert_eq!(bilans[&2024].actif["Amortissements cumulés"].amount, -12_000.0);
    assert_eq!(bilans[&2024].actif["Amortissements cumulés"].sub_category, "Actif immobilisé");

    let retained = bilans[&2024].passif["Report à nouveau"].amount;
    let expected = statements[&2022].resultat_exercice + statements[&2023].resultat_exercice;
    assert!((retained - expected).abs() < 1e-6);

    Ok(())
}

#[test]
fn test_update_recomputes_only_affected_years() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let property = seed_property(&ledger, "Studio Lille", 7_200.0)?;
    let years = [2022, 2023, 2024];

    ledger.calculate_compte_resultat(property, &years)?;
    ledger.calculate_bilan(property, &years)?;

    let cached = |year: i32| -> Result<(Option<String>, Option<String>)> {
        Ok(ledger.store().read(|t| {
            Ok((
                t.load_compte_resultat(property, year)
                    .map(|rows| serde_json::to_string(&rows))
                    .transpose()?,
                t.load_bilan(property, year)
                    .map(|rows| serde_json::to_string(&rows))
                    .transpose()?,
            ))
        })?)
    };
    let before: Vec<_> = years.iter().map(|&y| cached(y)).collect::<Result<_>>()?;

    let mut rent = ledger.store().read(|t| {
        Ok(t.list_transactions(property, Some(2023), Some(&["LOYERS".to_string()][..])))
    })?;
    assert_eq!(rent.len(), 1);
    let mut updated = rent.remove(0);
    updated.amount = 7_500.0;
    ledger.upsert_transaction(updated)?;

    let after: Vec<_> = years.iter().map(|&y| cached(y)).collect::<Result<_>>()?;
    // Compte de résultat: only 2023 is stale.
    assert_eq!(after[0].0, before[0].0);
    assert!(after[1].0.is_none());
    assert_eq!(after[2].0, before[2].0);
    // Bilan: 2023 and every later year carry the change.
    assert_eq!(after[0].1, before[0].1);
    assert!(after[1].1.is_none());
    assert!(after[2].1.is_none());

    let statements = ledger.calculate_compte_resultat(property, &years)?;
    assert_eq!(statements[&2023].produits["Loyers"], 7_500.0);
    assert_eq!(statements[&2022].produits["Loyers"], 7_200.0);

    let bilans = ledger.calculate_bilan(property, &years)?;
    assert!(bilans.values().all(|b| b.is_balanced(1e-6)));
    assert_eq!(cached(2022)?, before[0]);

    Ok(())
}

#[test]
fn test_funding_transaction_invalidates_every_year() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let property = seed_property(&ledger, "Maison", 12_000.0)?;
    ledger.recompute_depreciation(property)?;
    ledger.calculate_compte_resultat(property, &[2022, 2024])?;

    ledger.upsert_transaction(transaction(property, date(2023, 9, 1), -25_000.0, "IMMOBILISATIONS"))?;

    let entries = ledger.store().read(|t| Ok(t.cached_entries(property)))?;
    assert_eq!(entries, 0);

    let statements = ledger.calculate_compte_resultat(property, &[2022])?;
    assert_eq!(statements[&2022].charges["Dotations aux amortissements"], 5_000.0);
    Ok(())
}

#[test]
fn test_properties_are_isolated() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let first = seed_property(&ledger, "A", 6_000.0)?;
    let second = seed_property(&ledger, "B", 18_000.0)?;

    let a = ledger.calculate_compte_resultat(first, &[2023])?;
    let b = ledger.calculate_compte_resultat(second, &[2023])?;
    assert_eq!(a[&2023].produits["Loyers"], 6_000.0);
    assert_eq!(b[&2023].produits["Loyers"], 18_000.0);

    let bilan = ledger.calculate_bilan(first, &[2023])?;
    assert!(bilan[&2023].rows.iter().all(|r| r.property_id == first));
    assert_eq!(bilan[&2023].actif["Immobilisations"].amount, 100_000.0);

    ledger.delete_property(second)?;
    let again = ledger.calculate_compte_resultat(first, &[2023])?;
    assert_eq!(again, a);
    assert!(matches!(
        ledger.calculate_bilan(second, &[2023]),
        Err(LedgerError::MissingProperty(_))
    ));

    Ok(())
}

#[test]
fn test_identical_inputs_give_identical_output() -> Result<()> {
    init_logging();
    let render = || -> Result<String> {
        let ledger = in_memory_ledger(EngineConfig::default());
        let property = seed_property(&ledger, "Duplex", 10_400.0)?;
        let statements = ledger.calculate_compte_resultat(property, &[2022, 2023, 2024])?;
        let bilans = ledger.calculate_bilan(property, &[2022, 2023, 2024])?;
        Ok(format!(
            "{}\n{}",
            serde_json::to_string(&statements)?,
            serde_json::to_string(&bilans)?
        ))
    };

    assert_eq!(render()?, render()?);
    Ok(())
}

#[test]
fn test_override() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let property = seed_property(&ledger, "T2 Bordeaux", 8_400.0)?;

    let computed = ledger.calculate_compte_resultat(property, &[2023])?[&2023].resultat_exercice;
    ledger.calculate_bilan(property, &[2022, 2023, 2024])?;

    ledger.set_override(CompteResultatOverride {
        property_id: property,
        year: 2023,
        resultat_exercice: 1_000.0,
    })?;

    let statements = ledger.calculate_compte_resultat(property, &[2023])?;
    let statement = &statements[&2023];
    assert_eq!(statement.resultat_exercice, 1_000.0);
    assert_eq!(statement.resultat_override, Some(1_000.0));
    assert_eq!(statement.resultat_exercice_calcule, computed);

    let bilans = ledger.calculate_bilan(property, &[2022, 2023, 2024])?;
    assert!(bilans[&2022].is_balanced(1e-6));
    assert_eq!(bilans[&2023].passif["Résultat de l'exercice"].amount, 1_000.0);
    assert!((bilans[&2023].difference - (computed - 1_000.0)).abs() < 1e-6);

    ledger.clear_override(property, 2023)?;
    let bilans = ledger.calculate_bilan(property, &[2023, 2024])?;
    assert!(bilans.values().all(|b| b.is_balanced(1e-6)));

    Ok(())
}

#[test]
fn test_unmapped_bilan_category_is_reported() -> Result<()> {
    init_logging();
    let ledger = in_memory_ledger(EngineConfig::default());
    let property = seed_property(&ledger, "Local commercial", 15_000.0)?;

    let loan_mapping = ledger.store().read(|t| {
        Ok(t.list_bilan_mappings(property)
            .into_iter()
            .find(|m| m.special_source == Some(BilanSource::OutstandingLoanCapital)))
    })?;
    let loan_mapping = loan_mapping.ok_or_else(|| anyhow::anyhow!("loan mapping missing"))?;
    ledger.delete_bilan_mapping(property, loan_mapping.id)?;

    let bilans = ledger.calculate_bilan(property, &[2022])?;
    let bilan = &bilans[&2022];
    assert!(!bilan.is_balanced(0.01));
    assert!(bilan.difference > 90_000.0, "difference {}", bilan.difference);
    assert!(bilan.passif.get("Emprunts").is_none());

    Ok(())
}

#[test]
fn test_day_prorated_configuration() -> Result<()> {
    init_logging();
    let config = EngineConfig::from_json_str(r#"{ "depreciation_proration": "day_prorated" }"#)?;
    assert_eq!(config.stale_read_retries, 1);

    let ledger = in_memory_ledger(config);
    let property = seed_property(&ledger, "Chalet", 11_000.0)?;
    let summary = ledger.recompute_depreciation(property)?;
    assert_eq!(summary.rows_written, 26);

    let statements = ledger.calculate_compte_resultat(property, &[2022, 2023])?;
    let first = statements[&2022].charges["Dotations aux amortissements"];
    assert!(first < 4_000.0 && first > 3_000.0, "first year {}", first);
    assert_eq!(statements[&2023].charges["Dotations aux amortissements"], 4_000.0);

    let bilans = ledger.calculate_bilan(property, &[2022, 2023])?;
    assert!(bilans.values().all(|b| b.is_balanced(1e-6)));
    Ok(())
}

#[test]
fn test_concurrent_properties() -> Result<()> {
    init_logging();
    let ledger = Arc::new(in_memory_ledger(EngineConfig::default()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || -> Result<(PropertyId, f64)> {
                let rent = 6_000.0 + 1_000.0 * i as f64;
                let property = seed_property(&ledger, &format!("Lot {}", i), rent)?;
                for _ in 0..3 {
                    ledger.calculate_bilan(property, &[2022, 2023, 2024])?;
                    let statements = ledger.calculate_compte_resultat(property, &[2024])?;
                    assert_eq!(statements[&2024].produits["Loyers"], rent);
                }
                Ok((property, rent))
            })
        })
        .collect();

    for handle in handles {
        let (property, rent) = handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        let bilans = ledger.calculate_bilan(property, &[2024])?;
        assert!(bilans[&2024].is_balanced(1e-6));
        assert_eq!(
            ledger.calculate_compte_resultat(property, &[2023])?[&2023].produits["Loyers"],
            rent
        );
    }
    Ok(())
}

#[test]
fn test_schema_generation() -> Result<()> {
    let schema = schema_as_json::<BilanMapping>()?;
    assert!(schema.contains("special_source"));
    assert!(schema.contains("OutstandingLoanCapital") || schema.contains("outstanding_loan_capital"));

    let config_schema = EngineConfig::schema_as_json()?;
    assert!(config_schema.contains("depreciation_proration"));
    Ok(())
}
