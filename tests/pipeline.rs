use anyhow::Result;
use std::fs;
use wdi_pipeline::{run_all, run_stage, PipelineConfig, PipelineError, Stage, StageOutcome};

const COUNTRIES: &str = "Country Code,Short Name,Table Name,Long Name,Region,Income Group\n\
FRA,\"France, Republic of\",France,French Republic,Europe & Central Asia,High income\n\
BIH,Bosnia & Herzegovina,Bosnia and Herzegovina,Bosnia and Herzegovina,Europe & Central Asia,Upper middle income\n\
EMU,Euro area (excluding nothing),Euro area,Euro area,,\n\
WLD,World,World,World,,\n";

const DATA: &str = "Country Name,Country Code,Indicator Name,Indicator Code,2019,2020,\n\
France,FRA,GDP (current US$),NY.GDP.MKTP.CD,2700000000000,2600000000000,\n\
France,FRA,\"Population, total\",SP.POP.TOTL,..,67000000,\n\
France,FRA,GDP per capita (current US$),NY.GDP.PCAP.CD,40000,38800,\n\
France,FRA,Access to electricity,EG.ELC.ACCS.ZS,100,100,\n\
Bosnia and Herzegovina,BIH,GDP (current US$),NY.GDP.MKTP.CD,20000000000,,\n\
World,WLD,GDP (current US$),NY.GDP.MKTP.CD,87000000000000,85000000000000,\n\
World,WLD,\"Population, total\",SP.POP.TOTL,7700000000,7800000000,\n";

fn workspace() -> Result<(tempfile::TempDir, PipelineConfig)> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("WDICountry.csv"), COUNTRIES)?;
    fs::write(dir.path().join("WDICSV.csv"), DATA)?;
    let cfg = PipelineConfig::in_dir(dir.path());
    Ok((dir, cfg))
}

#[test]
fn full_pipeline_exports_clean_data() -> Result<()> {
    let (_dir, cfg) = workspace()?;
    let outcomes = run_all(&cfg)?;
    assert_eq!(outcomes.len(), 4);

    let StageOutcome::Ingested(ingested) = &outcomes[0] else {
        panic!("expected ingest outcome first");
    };
    assert_eq!(ingested.countries, 4);
    // 6 allowed indicator rows × 2 years
    assert_eq!(ingested.observations, 12);

    let StageOutcome::Cleaned(cleaned) = &outcomes[1] else {
        panic!("expected clean outcome second");
    };
    assert_eq!(cleaned.aggregates_dropped, 2);
    assert_eq!(cleaned.rows_written, 8);
    assert_eq!(cleaned.values_coerced_to_null, 1);
    assert_eq!(cleaned.gdp_per_capita_pairs, 1);

    let StageOutcome::Verified(verified) = &outcomes[2] else {
        panic!("expected verify outcome third");
    };
    assert_eq!(verified.total_records, 8);
    assert_eq!(verified.regions, vec!["Europe & Central Asia"]);

    let analysis = fs::read_to_string(cfg.analysis_export_path())?;
    let mut lines = analysis.lines();
    assert_eq!(
        lines.next(),
        Some(
            "source_country_name,country_code,indicator_name,indicator_code,year,value,\
             country_name,region,income_group,decade,gdp_per_capita"
        )
    );
    assert_eq!(analysis.lines().count(), 9);
    assert!(!analysis.contains("WLD"));
    assert!(analysis.contains("France Republic of"));
    assert!(analysis.contains("Bosnia and Herzegovina"));

    let fra_2020_gdp = analysis
        .lines()
        .find(|l| l.contains(",FRA,") && l.contains("NY.GDP.MKTP.CD,2020,"))
        .expect("FRA 2020 GDP row");
    let gpc: f64 = fra_2020_gdp.rsplit(',').next().unwrap_or_default().parse()?;
    assert!((gpc - 38805.970149).abs() < 1e-3);

    let country = fs::read_to_string(cfg.country_export_path())?;
    // the country table is exported raw, aggregates included
    assert_eq!(country.lines().count(), 5);
    Ok(())
}

#[test]
fn rerunning_clean_gives_identical_export() -> Result<()> {
    let (_dir, cfg) = workspace()?;
    run_all(&cfg)?;
    let first = fs::read(cfg.analysis_export_path())?;

    run_stage(Stage::Clean, &cfg)?;
    run_stage(Stage::Export, &cfg)?;
    let second = fs::read(cfg.analysis_export_path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn clean_before_ingest_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = PipelineConfig::in_dir(dir.path());

    // nothing on disk yet: the read-only stages refuse to create a database
    let err = run_stage(Stage::Verify, &cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingInput { .. })
    ));

    let err = run_stage(Stage::Clean, &cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingInput { .. })
    ));
    assert!(!cfg.db_path().exists());
    Ok(())
}

#[test]
fn ingest_with_missing_data_file_creates_no_database() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("WDICountry.csv"), COUNTRIES)?;
    let cfg = PipelineConfig::in_dir(dir.path());

    let err = run_stage(Stage::Ingest, &cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingInput { path }) if path.ends_with("WDICSV.csv")
    ));
    assert!(!cfg.db_path().exists());

    // clean on an empty but existing database still names the missing table
    wdi_pipeline::store::open(cfg.db_path())?;
    let err = run_stage(Stage::Clean, &cfg).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingTable(t)) if t == "country"
    ));
    Ok(())
}
