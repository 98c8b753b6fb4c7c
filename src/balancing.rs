pub mod class_balancer;
pub mod output_writer;
