use chrono::NaiveDate;
use rental_ledger::*;
use std::error::Error;

fn main() -> std::result::Result<(), Box<dyn Error>> {
    env_logger::init();

    let ledger = in_memory_ledger(EngineConfig::default());
    let property = ledger.create_property("T2 Lyon 7e")?;

    let loan = ledger.upsert_loan_config(LoanConfig {
        id: 0,
        property_id: property.id,
        name: "Crédit immobilier".to_string(),
        credit_amount: 200_000.0,
        interest_rate: 2.5,
        duration_years: 20,
        initial_deferral_months: 6,
        start_date: NaiveDate::from_ymd_opt(2023, 1, 1),
        end_date: None,
        monthly_insurance: 30.0,
        interest_sample_months: vec![1, 7, 12, 246],
    })?;

    let schedule = ledger.simulate_loan(property.id, loan.id)?;

    println!("🏠 {} - {}", property.name, loan.name);
    println!(
        "   {} periods ({} deferred), monthly payment {:.2}",
        schedule.term.total_periods(),
        schedule.term.deferral_periods,
        schedule.payment.abs()
    );
    println!(
        "   Total interest {:.2}, total paid {:.2}\n",
        schedule.total_interest(),
        schedule.total_paid()
    );

    println!("{:<6} {:>12} {:>12} {:>12} {:>12}", "Year", "Capital", "Interest", "Insurance", "Total");
    for (year, summary) in &schedule.yearly {
        println!(
            "{:<6} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
            year, summary.capital, summary.interest, summary.insurance, summary.total
        );
    }

    println!("\nSampled interest:");
    for (month, interest) in &schedule.sampled_interest {
        println!("   month {:>3}: {:.2}", month, interest);
    }
    for warning in &schedule.warnings {
        println!("⚠️  {}", warning.message);
    }

    let payments = ledger.save_simulated_payments(property.id, loan.id)?;
    println!("\n✅ Saved {} yearly payments", payments.len());

    ledger.upsert_compte_resultat_mapping(CompteResultatMapping {
        id: 0,
        property_id: property.id,
        category_name: "Coût du financement".to_string(),
        category_type: CompteResultatType::Charges,
        level_1_values: vec![],
        special_source: Some(ResultSource::FinancingCost),
    })?;

    let statements = ledger.calculate_compte_resultat(property.id, &[2023, 2024, 2025])?;
    for (year, statement) in &statements {
        println!(
            "   {} résultat de l'exercice: {:.2}",
            year, statement.resultat_exercice
        );
    }

    Ok(())
}
