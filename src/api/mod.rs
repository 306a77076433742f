use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    OutcomeSummary, Outlook, SimulationError, SimulationParameters, TrajectoryMatrix,
    estimate_annual_volatility, expected_return_from_fundamentals, periodic_returns, simulate,
    simulate_parallel, summarize,
};
use crate::market::{CsvPriceSource, PriceSource};
use crate::report::{render_report, write_trajectories_csv};

/// Upper bound on `years x simulations` for a single run.
const MAX_RUN_CELLS: u64 = 20_000_000;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "NVDA", help = "Ticker used as report label and CSV name")]
    symbol: String,
    #[arg(long, default_value_t = 100_000.0)]
    initial_value: f64,
    #[arg(
        long,
        help = "Expected annual return in percent; overrides earnings growth + dividend yield"
    )]
    expected_return: Option<f64>,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Expected earnings growth rate in percent"
    )]
    earnings_growth: f64,
    #[arg(long, default_value_t = 0.03, help = "Dividend yield in percent")]
    dividend_yield: f64,
    #[arg(
        long,
        conflicts_with_all = ["prices_csv", "data_dir"],
        help = "Annual volatility in percent"
    )]
    volatility: Option<f64>,
    #[arg(
        long,
        conflicts_with = "data_dir",
        help = "CSV price history used to estimate volatility"
    )]
    prices_csv: Option<PathBuf>,
    #[arg(long, help = "Directory holding <SYMBOL>.csv price histories")]
    data_dir: Option<PathBuf>,
    #[arg(long, help = "Only use the most recent N prices")]
    lookback: Option<usize>,
    #[arg(long, default_value_t = 10, help = "Investment horizon in periods")]
    years: u32,
    #[arg(long, default_value_t = 1000)]
    simulations: u32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, help = "Spread trials over all cores")]
    parallel: bool,
    #[arg(long, help = "Write trajectories (one column per trial) to this CSV")]
    paths_out: Option<PathBuf>,
    #[arg(long, help = "Print the JSON response instead of the text report")]
    json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    symbol: Option<String>,
    initial_value: Option<f64>,
    expected_return: Option<f64>,
    earnings_growth: Option<f64>,
    dividend_yield: Option<f64>,
    volatility: Option<f64>,
    prices: Option<Vec<f64>>,
    years: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u64>,
    parallel: Option<bool>,
    include_paths: Option<bool>,
}

/// A validated run, ready to execute.
#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub symbol: String,
    pub params: SimulationParameters,
    pub seed: Option<u64>,
    pub parallel: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub matrix: TrajectoryMatrix,
    pub summary: OutcomeSummary,
    pub outlook: Outlook,
}

impl SimulationRun {
    pub fn execute(&self) -> Result<RunOutput, SimulationError> {
        let matrix = match (self.parallel, self.seed) {
            (true, seed) => simulate_parallel(&self.params, seed.unwrap_or_else(rand::random))?,
            (false, Some(seed)) => simulate(&self.params, &mut StdRng::seed_from_u64(seed))?,
            (false, None) => simulate(&self.params, &mut StdRng::from_entropy())?,
        };
        let summary = summarize(&matrix)?;
        let outlook = Outlook::classify(&summary, self.params.initial_value);
        Ok(RunOutput {
            matrix,
            summary,
            outlook,
        })
    }
}

#[derive(Debug)]
struct ApiRequest {
    run: SimulationRun,
    include_paths: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    symbol: String,
    seed: Option<u64>,
    parameters: SimulationParameters,
    summary: OutcomeSummary,
    outlook: Outlook,
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_params(args: &RunArgs, prices: Option<&[f64]>) -> Result<SimulationParameters, String> {
    if !args.initial_value.is_finite() || args.initial_value <= 0.0 {
        return Err("--initial-value must be > 0".to_string());
    }

    if args.years == 0 {
        return Err("--years must be > 0".to_string());
    }

    if args.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if u64::from(args.years) * u64::from(args.simulations) > MAX_RUN_CELLS {
        return Err(format!(
            "--years x --simulations must be <= {MAX_RUN_CELLS}"
        ));
    }

    if let Some(expected_return) = args.expected_return {
        if !expected_return.is_finite() {
            return Err("--expected-return must be finite".to_string());
        }
    }

    for (name, value) in [
        ("--earnings-growth", args.earnings_growth),
        ("--dividend-yield", args.dividend_yield),
    ] {
        if !value.is_finite() {
            return Err(format!("{name} must be finite"));
        }
    }

    if args.lookback == Some(0) {
        return Err("--lookback must be > 0".to_string());
    }

    let annual_volatility = match (args.volatility, prices) {
        (Some(_), Some(_)) => {
            return Err("--volatility cannot be combined with a price history".to_string());
        }
        (Some(volatility), None) => {
            if !volatility.is_finite() || volatility < 0.0 {
                return Err("--volatility must be >= 0".to_string());
            }
            volatility / 100.0
        }
        (None, Some(prices)) => estimate_annual_volatility(&periodic_returns(prices))
            .map_err(|e| format!("price history: {e}"))?,
        (None, None) => {
            return Err(
                "one of --volatility, --prices-csv or --data-dir is required".to_string(),
            );
        }
    };

    let expected_annual_return = match args.expected_return {
        Some(expected_return) => expected_return / 100.0,
        None => expected_return_from_fundamentals(
            args.earnings_growth / 100.0,
            args.dividend_yield / 100.0,
        ),
    };

    SimulationParameters::new(
        args.initial_value,
        expected_annual_return,
        annual_volatility,
        args.years,
        args.simulations,
    )
    .map_err(|e| e.to_string())
}

fn load_prices(args: &RunArgs) -> anyhow::Result<Option<Vec<f64>>> {
    let source = match (&args.prices_csv, &args.data_dir) {
        (Some(path), _) => CsvPriceSource::from_file(path.clone()),
        (None, Some(dir)) => CsvPriceSource::from_dir(dir.clone()),
        (None, None) => return Ok(None),
    };
    let prices = source
        .with_lookback(args.lookback)
        .closing_prices(&args.symbol)
        .with_context(|| format!("failed to load prices for {}", args.symbol))?;
    Ok(Some(prices))
}

/// Runs one simulation from command-line arguments and prints the outcome.
pub fn run_cli(args: RunArgs) -> anyhow::Result<()> {
    let prices = load_prices(&args)?;
    let params = build_params(&args, prices.as_deref()).map_err(anyhow::Error::msg)?;
    let run = SimulationRun {
        symbol: args.symbol.clone(),
        params,
        seed: args.seed,
        parallel: args.parallel,
    };

    info!(
        symbol = %run.symbol,
        expected_annual_return = params.expected_annual_return,
        annual_volatility = params.annual_volatility,
        horizon = params.horizon_periods,
        trials = params.trial_count,
        "running simulation"
    );
    let output = run.execute()?;

    if let Some(path) = &args.paths_out {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        write_trajectories_csv(&output.matrix, BufWriter::new(file))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote trajectories");
    }

    if args.json {
        let response = build_simulate_response(&run, &output, false);
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!(
            "{}",
            render_report(&run.symbol, &output.summary, &output.outlook)
        );
    }
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("simulation API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!(error = %msg, "rejected simulate request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    let outcome = tokio::task::spawn_blocking(move || {
        let output = request.run.execute()?;
        Ok::<_, SimulationError>(build_simulate_response(
            &request.run,
            &output,
            request.include_paths,
        ))
    })
    .await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            warn!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut args = default_run_args();

    if let Some(v) = payload.symbol {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        args.symbol = trimmed.to_string();
    }
    if let Some(v) = payload.initial_value {
        args.initial_value = v;
    }
    if let Some(v) = payload.expected_return {
        args.expected_return = Some(v);
    }
    if let Some(v) = payload.earnings_growth {
        args.earnings_growth = v;
    }
    if let Some(v) = payload.dividend_yield {
        args.dividend_yield = v;
    }
    if payload.prices.is_some() {
        args.volatility = None;
    }
    if let Some(v) = payload.volatility {
        if payload.prices.is_some() {
            return Err("volatility and prices cannot both be set".to_string());
        }
        args.volatility = Some(v);
    }
    if let Some(v) = payload.years {
        args.years = v;
    }
    if let Some(v) = payload.simulations {
        args.simulations = v;
    }
    if let Some(v) = payload.seed {
        args.seed = Some(v);
    }
    if let Some(v) = payload.parallel {
        args.parallel = v;
    }

    let params = build_params(&args, payload.prices.as_deref())?;
    Ok(ApiRequest {
        run: SimulationRun {
            symbol: args.symbol,
            params,
            seed: args.seed,
            parallel: args.parallel,
        },
        include_paths: payload.include_paths.unwrap_or(false),
    })
}

fn default_run_args() -> RunArgs {
    RunArgs {
        symbol: "NVDA".to_string(),
        initial_value: 100_000.0,
        expected_return: None,
        earnings_growth: 20.0,
        dividend_yield: 0.03,
        volatility: Some(50.0),
        prices_csv: None,
        data_dir: None,
        lookback: None,
        years: 10,
        simulations: 1_000,
        seed: None,
        parallel: false,
        paths_out: None,
        json: false,
    }
}

fn build_simulate_response(
    run: &SimulationRun,
    output: &RunOutput,
    include_paths: bool,
) -> SimulateResponse {
    let paths = include_paths.then(|| {
        (0..output.matrix.trials())
            .map(|trial| output.matrix.trial_path(trial))
            .collect()
    });
    SimulateResponse {
        symbol: run.symbol.clone(),
        seed: run.seed,
        parameters: run.params,
        summary: output.summary,
        outlook: output.outlook,
        paths,
    }
}
