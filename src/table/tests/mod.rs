mod tests_manager;
mod tests_stream;
