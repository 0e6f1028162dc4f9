use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use stratum_planning::parsing::{parse_domain, parse_problem};
use stratum_planning::{parallel_plan_for_every_goals, parallel_plan_to_pddl};
use stratum_utils::input::Input;

/// Plans the actions satisfying a problem's goals, in priority order.
#[derive(Debug, Parser)]
#[command(name = "stratum-plan", rename_all = "kebab-case")]
struct Opt {
    /// PDDL domain file.
    domain: PathBuf,
    /// PDDL problem file.
    problem: PathBuf,
    /// Print the domain's succession cache instead of planning.
    #[arg(long = "print_successions")]
    print_successions: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = Opt::parse();
    match run(opt) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("{e:#}");
            exit(1);
        }
    }
}

fn run(opt: Opt) -> Result<String> {
    let domain_input = Input::from_file(&opt.domain)
        .with_context(|| format!("Could not read domain file {}", opt.domain.display()))?;
    let domain = parse_domain(domain_input).context("Invalid domain")?;

    if opt.print_successions {
        return Ok(domain.print_succession_cache());
    }

    let problem_input = Input::from_file(&opt.problem)
        .with_context(|| format!("Could not read problem file {}", opt.problem.display()))?;
    let problem = parse_problem(problem_input, &domain).context("Invalid problem")?;

    let plan = parallel_plan_for_every_goals(&problem, &domain, None);
    Ok(parallel_plan_to_pddl(&plan, &domain, &problem))
}
