use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::{ProblemConfig, ServerConfig};
use crate::queue::JobQueue;
use crate::routes::{json_error_handler, post_execute_handler};

pub fn build_server(
    server_config: ServerConfig,
    problems: Arc<Vec<ProblemConfig>>,
    job_queue: Arc<JobQueue>,
) -> std::io::Result<Server> {
    let problems = web::Data::from(problems);
    let job_queue = web::Data::from(job_queue);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(problems.clone())
            .app_data(job_queue.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_execute_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
